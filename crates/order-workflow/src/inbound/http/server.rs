use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post, put},
    serve, Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::identity::{idempotency_key, Identity};
use super::response::{ApiResponse, OrderList};
use crate::application::order_service::OrderService;
use crate::errors::AppError;
use order_types::domain::order::{NewOrder, Order, OrderStatus, PaymentStatus};
use order_types::ports::order_repository::{
    OrderFilter, OrderRepository, OrderStats, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use order_types::ports::product_directory::ProductDirectory;

#[derive(Clone)]
pub struct HttpServerConfig {
    pub port: String,
}

pub struct HttpServer<R: OrderRepository, P: ProductDirectory> {
    pub service: Arc<OrderService<R, P>>,
    pub config: HttpServerConfig,
}

type Svc<R, P> = State<Arc<OrderService<R, P>>>;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentRequest {
    pub payment_status: PaymentStatus,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl ListParams {
    fn into_filter(self, user_id: Option<String>) -> Result<OrderFilter, AppError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page < 1 {
            return Err(AppError::BadRequest("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(OrderFilter {
            user_id,
            status: self.status,
            payment_status: self.payment_status,
            page,
            limit,
        })
    }
}

fn order_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid order id: {raw}")))
}

impl<R, P> HttpServer<R, P>
where
    R: OrderRepository,
    P: ProductDirectory,
{
    pub async fn new(service: OrderService<R, P>, config: HttpServerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            service: Arc::new(service),
            config,
        })
    }

    pub fn router(&self) -> Router {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                let request_id = Uuid::new_v4();
                tracing::info_span!(
                    "http_request",
                    %request_id,
                    method = %request.method(),
                    uri
                )
            })
            .on_request(
                |request: &axum::extract::Request<_>, span: &tracing::Span| {
                    tracing::debug!(
                        parent: span,
                        method = %request.method(),
                        uri = %request.uri(),
                        "request"
                    );
                },
            )
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &tracing::Span| {
                    tracing::info!(
                        parent: span,
                        status = %response.status(),
                        latency_ms = %latency.as_millis(),
                        "response"
                    );
                },
            );

        Router::new()
            .route("/health", get(health))
            .route(
                "/api/orders",
                post(create_order::<R, P>).get(list_orders::<R, P>),
            )
            .route("/api/orders/stats", get(order_stats::<R, P>))
            .route(
                "/api/orders/number/{order_number}",
                get(get_order_by_number::<R, P>),
            )
            .route("/api/orders/{id}", get(get_order::<R, P>))
            .route("/api/orders/{id}/status", put(update_status::<R, P>))
            .route(
                "/api/orders/{id}/payment-status",
                put(update_payment_status::<R, P>),
            )
            .route("/api/orders/{id}/cancel", post(cancel_order::<R, P>))
            .layer(trace_layer)
            .layer(CorsLayer::permissive())
            .with_state(self.service.clone())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let app = self.router();
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port).parse()?;
        tracing::info!("order service listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        serve(listener, app.into_make_service()).await?;
        Ok(())
    }
}

async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::ok_with_message(
        serde_json::json!({ "status": "ok" }),
        "Order service is running",
    ))
}

async fn create_order<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    headers: HeaderMap,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> Result<Response, AppError> {
    let user_id = identity.require_user()?;
    let Json(request) = payload?;
    let placed = service
        .create_order(user_id, request, idempotency_key(&headers))
        .await?;
    let (status, message) = if placed.replayed {
        (StatusCode::OK, "Order already created")
    } else {
        (StatusCode::CREATED, "Order created successfully")
    };
    Ok(ApiResponse::ok_with_message(placed.order, message).with_status(status))
}

async fn list_orders<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<ApiResponse<OrderList<Order>>, AppError> {
    let scope = if identity.0.is_admin() {
        None
    } else {
        Some(identity.require_user()?.to_owned())
    };
    let Query(params) = params?;
    let filter = params.into_filter(scope)?;
    let page = service.get_orders(&filter).await?;
    Ok(ApiResponse::ok(OrderList::new(
        page.orders,
        page.total,
        filter.page,
        filter.limit,
    )))
}

async fn order_stats<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
) -> Result<ApiResponse<OrderStats>, AppError> {
    identity.require_user()?;
    let stats = service.get_order_stats(identity.0.scope()).await?;
    Ok(ApiResponse::ok(stats))
}

async fn get_order<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<ApiResponse<Order>, AppError> {
    identity.require_user()?;
    let order = service.get_order_for(&identity.0, order_id(&id)?).await?;
    Ok(ApiResponse::ok(order))
}

async fn get_order_by_number<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    Path(order_number): Path<String>,
) -> Result<ApiResponse<Order>, AppError> {
    identity.require_user()?;
    let order = service
        .get_order_by_number(&identity.0, &order_number)
        .await?;
    Ok(ApiResponse::ok(order))
}

async fn update_status<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<ApiResponse<Order>, AppError> {
    identity.require_admin()?;
    let id = order_id(&id)?;
    let Json(body) = payload?;
    let order = service
        .update_order_status(id, body.status, body.reason)
        .await?;
    Ok(ApiResponse::ok_with_message(order, "Order status updated successfully"))
}

async fn update_payment_status<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePaymentRequest>, JsonRejection>,
) -> Result<ApiResponse<Order>, AppError> {
    identity.require_admin()?;
    let id = order_id(&id)?;
    let Json(body) = payload?;
    let order = service.update_payment_status(id, body.payment_status).await?;
    Ok(ApiResponse::ok_with_message(order, "Payment status updated successfully"))
}

async fn cancel_order<R: OrderRepository, P: ProductDirectory>(
    State(service): Svc<R, P>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<ApiResponse<Order>, AppError> {
    let user_id = identity.require_user()?;
    let id = order_id(&id)?;
    let Json(body) = payload?;
    let order = service.cancel_order(id, user_id, &body.reason).await?;
    Ok(ApiResponse::ok_with_message(order, "Order cancelled successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_default_and_bounds() {
        let filter = ListParams::default().into_filter(Some("u1".into())).unwrap();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(filter.user_id.as_deref(), Some("u1"));

        for (page, limit) in [(Some(0), None), (None, Some(0)), (None, Some(101))] {
            let params = ListParams {
                page,
                limit,
                ..Default::default()
            };
            assert!(matches!(params.into_filter(None), Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn order_id_must_be_a_uuid() {
        assert!(order_id("not-a-uuid").is_err());
        assert!(order_id(&Uuid::new_v4().to_string()).is_ok());
    }
}
