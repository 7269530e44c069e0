use async_trait::async_trait;
use order_types::domain::product::{ProductId, ProductSnapshot};
use order_types::ports::product_directory::{DirectoryError, ProductDirectory};
use reqwest::{StatusCode, Url};
use std::future::Future;
use std::time::Duration;

use crate::config::ProductServiceConfig;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Exponential backoff: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

enum Attempt<T> {
    Done(Result<T, DirectoryError>),
    Retry(DirectoryError),
}

/// Product directory reached over HTTP.
#[derive(Clone)]
pub struct HttpProductDirectory {
    base: Url,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpProductDirectory {
    pub fn new(config: &ProductServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Self::with_client(&config.base_url, client, Self::policy_from(config))
    }

    pub fn with_client(
        base_url: &str,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        // Keep any path prefix when joining relative URLs.
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            client,
            retry,
        })
    }

    fn policy_from(config: &ProductServiceConfig) -> RetryPolicy {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.retry_backoff,
            max_delay: MAX_BACKOFF,
        }
    }

    fn url(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base
            .join(path)
            .map_err(|e| DirectoryError::Invalid(e.to_string()))
    }

    async fn retrying<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, DirectoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Attempt::Done(result) => return result,
                Attempt::Retry(err) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        call = what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "product directory call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Attempt::Retry(err) => {
                    tracing::error!(call = what, attempts = attempt + 1, error = %err, "product directory call gave up");
                    return Err(err);
                }
            }
        }
    }
}

fn unavailable(e: reqwest::Error) -> DirectoryError {
    DirectoryError::Unavailable(e.to_string())
}

#[async_trait]
impl ProductDirectory for HttpProductDirectory {
    async fn get_product(&self, id: ProductId) -> Result<ProductSnapshot, DirectoryError> {
        let url = self.url(&format!("api/products/{id}"))?;
        self.retrying("get_product", || {
            let request = self.client.get(url.clone());
            async move {
                let res = match request.send().await {
                    Ok(res) => res,
                    Err(e) if e.is_timeout() || e.is_connect() => {
                        return Attempt::Retry(unavailable(e))
                    }
                    Err(e) => return Attempt::Done(Err(unavailable(e))),
                };
                let status = res.status();
                if status == StatusCode::NOT_FOUND {
                    return Attempt::Done(Err(DirectoryError::NotFound(id)));
                }
                if status.is_server_error() {
                    return Attempt::Retry(DirectoryError::Unavailable(format!(
                        "product service answered {status}"
                    )));
                }
                if !status.is_success() {
                    return Attempt::Done(Err(DirectoryError::Invalid(format!(
                        "product service answered {status}"
                    ))));
                }
                match res.json::<ProductSnapshot>().await {
                    Ok(product) => Attempt::Done(Ok(product)),
                    Err(e) if e.is_timeout() => Attempt::Retry(unavailable(e)),
                    Err(e) => Attempt::Done(Err(DirectoryError::Invalid(e.to_string()))),
                }
            }
        })
        .await
    }

    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<(), DirectoryError> {
        let url = self.url(&format!("api/products/{id}/stock"))?;
        // Not idempotent: only retried when the request never reached the server.
        self.retrying("adjust_stock", || {
            let request = self
                .client
                .patch(url.clone())
                .query(&[("quantity", delta)]);
            async move {
                let res = match request.send().await {
                    Ok(res) => res,
                    Err(e) if e.is_connect() => return Attempt::Retry(unavailable(e)),
                    // Sent but unanswered: the directory may have applied it.
                    Err(e) => {
                        return Attempt::Done(Err(DirectoryError::Indeterminate(e.to_string())))
                    }
                };
                let status = res.status();
                let outcome = match status {
                    s if s.is_success() => Ok(()),
                    StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(id)),
                    // The directory refuses to take stock below zero.
                    StatusCode::BAD_REQUEST if delta < 0 => {
                        Err(DirectoryError::InsufficientStock(id))
                    }
                    s if s.is_server_error() => Err(DirectoryError::Unavailable(format!(
                        "product service answered {s}"
                    ))),
                    s => Err(DirectoryError::Invalid(format!(
                        "product service answered {s}"
                    ))),
                };
                Attempt::Done(outcome)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn directory(server: &MockServer, max_retries: u32) -> HttpProductDirectory {
        HttpProductDirectory::with_client(
            &server.base_url(),
            reqwest::Client::new(),
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn fetches_product_snapshot() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/products/1");
            then.status(200).json_body(serde_json::json!({
                "id": 1,
                "name": "Tee",
                "price": "100000.00",
                "stock": 10,
                "images": ["tee.png"],
                "sku": "TEE-1",
                "seller_id": "s-1"
            }));
        });

        let product = directory(&server, 0).get_product(1).await.unwrap();
        assert_eq!(product.price, 100_000);
        assert_eq!(product.stock, 10);
        assert_eq!(product.sku, "TEE-1");
        mock.assert();
    }

    #[tokio::test]
    async fn missing_product_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/products/9");
            then.status(404).json_body(serde_json::json!({"detail": "Product not found"}));
        });

        let err = directory(&server, 3).get_product(9).await.unwrap_err();
        assert_eq!(err, DirectoryError::NotFound(9));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_the_retry_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/products/2");
            then.status(503);
        });

        let err = directory(&server, 2).get_product(2).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
        mock.assert_hits(3);
    }

    #[tokio::test]
    async fn stock_adjustment_sends_signed_quantity() {
        let server = MockServer::start();
        let reserve = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH)
                .path("/api/products/1/stock")
                .query_param("quantity", "-2");
            then.status(200)
                .json_body(serde_json::json!({"message": "Stock updated", "new_stock": 8}));
        });
        let restore = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH)
                .path("/api/products/1/stock")
                .query_param("quantity", "2");
            then.status(200)
                .json_body(serde_json::json!({"message": "Stock updated", "new_stock": 10}));
        });

        let dir = directory(&server, 0);
        dir.adjust_stock(1, -2).await.unwrap();
        dir.adjust_stock(1, 2).await.unwrap();
        reserve.assert();
        restore.assert();
    }

    #[tokio::test]
    async fn rejected_reservation_is_insufficient_stock_and_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH).path("/api/products/3/stock");
            then.status(400).json_body(
                serde_json::json!({"detail": "Product not found or insufficient stock"}),
            );
        });

        let err = directory(&server, 3).adjust_stock(3, -5).await.unwrap_err();
        assert_eq!(err, DirectoryError::InsufficientStock(3));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn stock_patch_is_not_retried_on_server_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH).path("/api/products/4/stock");
            then.status(500);
        });

        let err = directory(&server, 3).adjust_stock(4, -1).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn timed_out_stock_patch_is_indeterminate_and_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH)
                .path("/api/products/1/stock")
                .query_param("quantity", "-2");
            then.status(200)
                .delay(Duration::from_millis(400))
                .json_body(serde_json::json!({"message": "Stock updated", "new_stock": 8}));
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let dir = HttpProductDirectory::with_client(
            &server.base_url(),
            client,
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        )
        .unwrap();

        let err = dir.adjust_stock(1, -2).await.unwrap_err();
        assert!(err.is_indeterminate());
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn keeps_base_path_prefix() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/catalog/api/products/5");
            then.status(200).json_body(serde_json::json!({
                "id": 5, "name": "Cap", "price": 9000, "stock": 1, "sku": "CAP"
            }));
        });

        let dir = HttpProductDirectory::with_client(
            &server.url("/catalog"),
            reqwest::Client::new(),
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        assert_eq!(dir.get_product(5).await.unwrap().name, "Cap");
        mock.assert();
    }
}
