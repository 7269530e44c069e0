use anyhow::Context;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: String,
    pub database_url: Option<String>,
    pub product_service: ProductServiceConfig,
}

#[derive(Debug, Clone)]
pub struct ProductServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ProductServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3002".into(),
            timeout: Duration::from_millis(3000),
            max_retries: 2,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let server_port = env::var("SERVER_PORT").unwrap_or_else(|_| "3003".into());
        let database_url = env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());

        let defaults = ProductServiceConfig::default();
        let product_service = ProductServiceConfig {
            base_url: env::var("PRODUCT_SERVICE_URL").unwrap_or(defaults.base_url),
            timeout: Duration::from_millis(env_or(
                "PRODUCT_SERVICE_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )?),
            max_retries: env_or("PRODUCT_SERVICE_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: Duration::from_millis(env_or(
                "PRODUCT_SERVICE_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
        };

        Ok(Self {
            server_port,
            database_url,
            product_service,
        })
    }
}
