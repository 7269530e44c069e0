use order_store::{build_repo, Repo};
use order_workflow::application::order_service::OrderService;
use order_workflow::config::Config;
use order_workflow::inbound::http::{HttpServer, HttpServerConfig};
use order_workflow::outbound::HttpProductDirectory;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for DATABASE_URL / SERVER_PORT / PRODUCT_SERVICE_* when present.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let repo: Repo = build_repo(config.database_url.as_deref()).await?;
    let products = HttpProductDirectory::new(&config.product_service)?;
    tracing::info!(
        product_service = %config.product_service.base_url,
        timeout_ms = config.product_service.timeout.as_millis() as u64,
        max_retries = config.product_service.max_retries,
        "product directory configured"
    );
    let service = OrderService::new(repo, products);

    let server_cfg = HttpServerConfig {
        port: config.server_port.clone(),
    };

    let http = HttpServer::new(service, server_cfg).await?;
    http.run().await
}
