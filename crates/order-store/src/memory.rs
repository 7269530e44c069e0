use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use order_types::domain::order::{Order, OrderStatus, Revision};
use order_types::ports::order_repository::{
    OrderFilter, OrderPage, OrderRepository, OrderStats, RepoError, StatusCount,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct InMemoryRepo {
    pub map: Arc<DashMap<Uuid, Order>>,
    numbers: Arc<DashMap<String, Uuid>>,
    idempotency: Arc<DashMap<(String, String), Uuid>>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            numbers: Arc::new(DashMap::new()),
            idempotency: Arc::new(DashMap::new()),
        }
    }

    fn scoped(&self, user_id: Option<&str>) -> Vec<Order> {
        self.map
            .iter()
            .filter(|kv| user_id.map_or(true, |u| kv.value().user_id == u))
            .map(|kv| kv.value().clone())
            .collect()
    }
}

impl Default for InMemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for InMemoryRepo {
    async fn create(&self, order: Order) -> Result<Order, RepoError> {
        let key = order
            .idempotency_key
            .clone()
            .map(|k| (order.user_id.clone(), k));

        if let Some(key) = &key {
            match self.idempotency.entry(key.clone()) {
                Entry::Occupied(_) => {
                    return Err(RepoError::DuplicateIdempotencyKey(key.1.clone()))
                }
                Entry::Vacant(slot) => {
                    slot.insert(order.id);
                }
            }
        }

        match self.numbers.entry(order.order_number.clone()) {
            Entry::Occupied(_) => {
                if let Some(key) = &key {
                    self.idempotency.remove(key);
                }
                return Err(RepoError::DuplicateOrderNumber(order.order_number));
            }
            Entry::Vacant(slot) => {
                slot.insert(order.id);
            }
        }

        self.map.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        Ok(self.map.get(&id).map(|r| r.clone()))
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepoError> {
        let id = match self.numbers.get(order_number) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        let id = match self.idempotency.get(&(user_id.to_owned(), key.to_owned())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepoError> {
        let mut matching: Vec<Order> = self
            .map
            .iter()
            .filter(|kv| filter.matches(kv.value()))
            .map(|kv| kv.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(OrderPage { orders, total })
    }

    async fn update(&self, order: Order, expected: Revision) -> Result<Option<Order>, RepoError> {
        let Some(mut stored) = self.map.get_mut(&order.id) else {
            return Ok(None);
        };
        if stored.revision() != expected {
            return Err(RepoError::StaleRevision(order.id));
        }
        stored.status = order.status;
        stored.payment_status = order.payment_status;
        stored.cancel_reason = order.cancel_reason;
        stored.updated_at = order.updated_at;
        stored.shipped_at = order.shipped_at;
        stored.delivered_at = order.delivered_at;
        stored.cancelled_at = order.cancelled_at;
        Ok(Some(stored.clone()))
    }

    async fn stats(&self, user_id: Option<&str>) -> Result<OrderStats, RepoError> {
        let orders = self.scoped(user_id);
        let total_orders = orders.len() as u64;
        let total_revenue: i64 = orders.iter().map(|o| o.total_amount).sum();
        let average_order_value = if total_orders == 0 {
            0.0
        } else {
            total_revenue as f64 / total_orders as f64
        };
        let by_status = OrderStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: orders.iter().filter(|o| o.status == status).count() as u64,
            })
            .filter(|c| c.count > 0)
            .collect();
        Ok(OrderStats {
            total_orders,
            total_revenue,
            average_order_value,
            by_status,
        })
    }
}
