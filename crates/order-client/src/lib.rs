use std::time::Duration;

use anyhow::Context;
use order_types::domain::order::{NewOrder, Order, OrderStatus, PaymentStatus};
use order_types::ports::order_repository::OrderStats;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Non-success answer from the order API, carrying the envelope message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("order api answered {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Result of a create call. `replayed` is set when the server matched the
/// idempotency key to an earlier order.
#[derive(Debug, Clone)]
pub struct Created {
    pub order: Order,
    pub replayed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Serialize)]
struct UpdateStatusRequest<'a> {
    status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePaymentRequest {
    payment_status: PaymentStatus,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    reason: &'a str,
}

#[derive(Clone)]
pub struct OrdersClientBuilder {
    base: Url,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct OrdersClient {
    base: Url,
    client: reqwest::Client,
}

impl OrdersClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::builder(base_url)?.build()
    }

    pub fn builder(base_url: &str) -> anyhow::Result<OrdersClientBuilder> {
        let mut base = Url::parse(base_url).context("invalid base url")?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(OrdersClientBuilder {
            base,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base.join(path).context("failed to join url")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<(u16, T)> {
        let res = request.send().await?;
        let status = res.status();
        let body: Envelope<T> = res
            .json()
            .await
            .with_context(|| format!("unreadable response body ({status})"))?;
        if !status.is_success() || !body.success {
            let message = body.message.unwrap_or_else(|| status.to_string());
            tracing::debug!(status = status.as_u16(), %message, "order api call failed");
            return Err(ApiError {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        let data = body.data.context("response envelope carried no data")?;
        Ok((status.as_u16(), data))
    }

    pub async fn create_order(
        &self,
        order: &NewOrder,
        idempotency_key: Option<&str>,
    ) -> anyhow::Result<Created> {
        let mut request = self.client.post(self.url("api/orders")?).json(order);
        if let Some(key) = idempotency_key {
            request = request.header("idempotency-key", key);
        }
        let (status, order) = self.send::<Order>(request).await?;
        Ok(Created {
            order,
            replayed: status == 200,
        })
    }

    pub async fn get_order(&self, id: Uuid) -> anyhow::Result<Order> {
        let request = self.client.get(self.url(&format!("api/orders/{id}"))?);
        Ok(self.send(request).await?.1)
    }

    pub async fn get_order_by_number(&self, order_number: &str) -> anyhow::Result<Order> {
        let request = self
            .client
            .get(self.url(&format!("api/orders/number/{order_number}"))?);
        Ok(self.send(request).await?.1)
    }

    pub async fn list_orders(&self, query: &ListQuery) -> anyhow::Result<OrderPage> {
        let request = self.client.get(self.url("api/orders")?).query(query);
        Ok(self.send(request).await?.1)
    }

    pub async fn stats(&self) -> anyhow::Result<OrderStats> {
        let request = self.client.get(self.url("api/orders/stats")?);
        Ok(self.send(request).await?.1)
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> anyhow::Result<Order> {
        let request = self
            .client
            .put(self.url(&format!("api/orders/{id}/status"))?)
            .json(&UpdateStatusRequest { status, reason });
        Ok(self.send(request).await?.1)
    }

    pub async fn update_payment_status(
        &self,
        id: Uuid,
        payment_status: PaymentStatus,
    ) -> anyhow::Result<Order> {
        let request = self
            .client
            .put(self.url(&format!("api/orders/{id}/payment-status"))?)
            .json(&UpdatePaymentRequest { payment_status });
        Ok(self.send(request).await?.1)
    }

    pub async fn cancel_order(&self, id: Uuid, reason: &str) -> anyhow::Result<Order> {
        let request = self
            .client
            .post(self.url(&format!("api/orders/{id}/cancel"))?)
            .json(&CancelRequest { reason });
        Ok(self.send(request).await?.1)
    }
}

impl OrdersClientBuilder {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let header_name =
            HeaderName::from_bytes(key.as_ref().as_bytes()).context("invalid header name")?;
        let header_value = HeaderValue::from_str(value.as_ref()).context("invalid header value")?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Sends every request as `user_id`.
    pub fn as_user(self, user_id: impl AsRef<str>) -> anyhow::Result<Self> {
        self.with_header("x-user-id", user_id)
    }

    pub fn as_admin(self) -> anyhow::Result<Self> {
        self.with_header("x-user-role", "ADMIN")
    }

    pub fn build(self) -> anyhow::Result<OrdersClient> {
        let mut builder = reqwest::Client::builder();
        if !self.headers.is_empty() {
            builder = builder.default_headers(self.headers);
        }
        if let Some(t) = self.timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build()?;
        Ok(OrdersClient {
            base: self.base,
            client,
        })
    }
}
