use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{Order, OrderStatus, PaymentStatus, Revision};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("db error: {0}")]
    DbError(String),

    #[error("order number {0} already exists")]
    DuplicateOrderNumber(String),

    #[error("idempotency key {0} already used")]
    DuplicateIdempotencyKey(String),

    #[error("order {0} was modified concurrently")]
    StaleRevision(Uuid),
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub page: u32,
    pub limit: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            payment_status: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl OrderFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.as_deref().map_or(true, |u| order.user_id == u)
            && self.status.map_or(true, |s| order.status == s)
            && self
                .payment_status
                .map_or(true, |p| order.payment_status == p)
    }
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_revenue: i64,
    pub average_order_value: f64,
    pub by_status: Vec<StatusCount>,
}

/// Order aggregate storage. An order and its line items are written and
/// read together.
#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    /// Persists header and items atomically.
    async fn create(&self, order: Order) -> Result<Order, RepoError>;
    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepoError>;
    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepoError>;
    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Order>, RepoError>;
    /// Newest first.
    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepoError>;
    /// Writes the mutable header fields if the stored order still has
    /// `expected` statuses. `Ok(None)` when the order does not exist.
    async fn update(&self, order: Order, expected: Revision) -> Result<Option<Order>, RepoError>;
    async fn stats(&self, user_id: Option<&str>) -> Result<OrderStats, RepoError>;
}
