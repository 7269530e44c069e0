use crate::errors::AppError;
use chrono::Utc;
use order_types::domain::caller::Caller;
use order_types::domain::order::{
    validate_idempotency_key, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus,
};
use order_types::domain::product::{ProductId, ProductSnapshot};
use order_types::ports::order_repository::{
    OrderFilter, OrderPage, OrderRepository, OrderStats, RepoError,
};
use order_types::ports::product_directory::{DirectoryError, ProductDirectory};
use std::collections::HashMap;
use uuid::Uuid;

/// Order numbers are random enough that a second clash is already unlikely.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Signed stock deltas, one per line item.
type StockMoves = Vec<(ProductId, i64)>;

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    /// The idempotency key matched an order created by an earlier request.
    pub replayed: bool,
}

pub struct OrderService<R: OrderRepository, P: ProductDirectory> {
    repo: R,
    products: P,
}

fn denied() -> AppError {
    AppError::NotFound("Order not found or access denied".into())
}

fn order_not_found() -> AppError {
    AppError::NotFound("Order not found".into())
}

impl<R: OrderRepository, P: ProductDirectory> OrderService<R, P> {
    pub fn new(repo: R, products: P) -> Self {
        Self { repo, products }
    }

    /// Validates, prices and reserves stock for a new order, then persists it.
    /// Stock is reserved for every line or for none; reservations are released
    /// again if the order cannot be stored.
    #[tracing::instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_order(
        &self,
        user_id: &str,
        request: NewOrder,
        idempotency_key: Option<String>,
    ) -> Result<PlacedOrder, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthenticated);
        }
        request.validate()?;
        if let Some(key) = &idempotency_key {
            validate_idempotency_key(key)?;
            if let Some(existing) = self.repo.find_by_idempotency_key(user_id, key).await? {
                tracing::info!(order_number = %existing.order_number, "idempotent replay");
                return Ok(PlacedOrder {
                    order: existing,
                    replayed: true,
                });
            }
        }

        let snapshots = self.fetch_available(&request).await?;
        let items = request
            .items
            .iter()
            .map(|line| {
                let product = snapshots
                    .get(&line.product_id)
                    .ok_or_else(|| AppError::NotFound(format!("Product {} not found", line.product_id)))?;
                Ok(OrderItem::snapshot(product, line.quantity)?)
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let order = Order::place(
            user_id.to_owned(),
            items,
            request.shipping_address,
            request.payment_method,
            request.notes,
        )?
        .with_idempotency_key(idempotency_key);

        let reservations: StockMoves = order
            .stock_lines()
            .into_iter()
            .map(|(id, qty)| (id, -i64::from(qty)))
            .collect();
        self.apply_all(&reservations)
            .await
            .map_err(|(id, e)| stock_error(id, e, &snapshots))?;

        match self.persist(order).await {
            Ok(order) => {
                tracing::info!(
                    order_number = %order.order_number,
                    total_amount = order.total_amount,
                    "order created"
                );
                Ok(PlacedOrder {
                    order,
                    replayed: false,
                })
            }
            Err((order, err)) => {
                tracing::warn!(error = %err, "order not stored, releasing reserved stock");
                self.revert(&reservations).await;
                if let RepoError::DuplicateIdempotencyKey(key) = &err {
                    // A concurrent retry with the same key won the race.
                    if let Some(existing) =
                        self.repo.find_by_idempotency_key(&order.user_id, key).await?
                    {
                        return Ok(PlacedOrder {
                            order: existing,
                            replayed: true,
                        });
                    }
                    return Err(AppError::Conflict(
                        "A request with this Idempotency-Key is in progress".into(),
                    ));
                }
                Err(err.into())
            }
        }
    }

    /// Reads each distinct product once and checks stock against the total
    /// quantity requested for it.
    async fn fetch_available(
        &self,
        request: &NewOrder,
    ) -> Result<HashMap<ProductId, ProductSnapshot>, AppError> {
        let mut snapshots = HashMap::new();
        for (product_id, wanted) in request.quantities_by_product() {
            let product = self
                .products
                .get_product(product_id)
                .await
                .map_err(|e| stock_error(product_id, e, &snapshots))?;
            if u64::try_from(product.stock).unwrap_or(0) < wanted {
                tracing::info!(product_id, stock = product.stock, wanted, "insufficient stock");
                return Err(AppError::InsufficientStock(product.name));
            }
            snapshots.insert(product_id, product);
        }
        Ok(snapshots)
    }

    async fn persist(&self, mut order: Order) -> Result<Order, (Order, RepoError)> {
        let mut attempt = 1;
        loop {
            match self.repo.create(order.clone()).await {
                Ok(stored) => return Ok(stored),
                Err(RepoError::DuplicateOrderNumber(number)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    tracing::warn!(order_number = %number, "order number collision, regenerating");
                    order.regenerate_number();
                    attempt += 1;
                }
                Err(e) => return Err((order, e)),
            }
        }
    }

    /// Applies every move or none: when one fails, the moves already applied
    /// are reverted in reverse order. A move with an indeterminate outcome
    /// counts as applied and is reverted too.
    async fn apply_all(&self, moves: &[(ProductId, i64)]) -> Result<(), (ProductId, DirectoryError)> {
        for (index, &(product_id, delta)) in moves.iter().enumerate() {
            if let Err(e) = self.products.adjust_stock(product_id, delta).await {
                let applied = if e.is_indeterminate() { index + 1 } else { index };
                tracing::warn!(
                    product_id,
                    delta,
                    indeterminate = e.is_indeterminate(),
                    error = %e,
                    "stock adjustment failed, compensating"
                );
                self.revert(&moves[..applied]).await;
                return Err((product_id, e));
            }
        }
        Ok(())
    }

    async fn revert(&self, applied: &[(ProductId, i64)]) {
        for &(product_id, delta) in applied.iter().rev() {
            if let Err(e) = self.products.adjust_stock(product_id, -delta).await {
                tracing::error!(
                    product_id,
                    delta = -delta,
                    error = %e,
                    "compensating stock adjustment failed, stock needs manual reconciliation"
                );
            }
        }
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Order, AppError> {
        self.repo.get(id).await?.ok_or_else(order_not_found)
    }

    /// Fetch by id for `caller`; non-admins only see their own orders.
    pub async fn get_order_for(&self, caller: &Caller, id: Uuid) -> Result<Order, AppError> {
        let order = self.get_order(id).await?;
        if !caller.can_view(&order) {
            return Err(AppError::Forbidden("Access denied".into()));
        }
        Ok(order)
    }

    pub async fn get_order_by_number(
        &self,
        caller: &Caller,
        order_number: &str,
    ) -> Result<Order, AppError> {
        let order = self
            .repo
            .get_by_number(order_number)
            .await?
            .ok_or_else(order_not_found)?;
        if !caller.can_view(&order) {
            return Err(AppError::Forbidden("Access denied".into()));
        }
        Ok(order)
    }

    pub async fn get_orders(&self, filter: &OrderFilter) -> Result<OrderPage, AppError> {
        Ok(self.repo.list(filter).await?)
    }

    pub async fn get_order_stats(&self, user_id: Option<&str>) -> Result<OrderStats, AppError> {
        Ok(self.repo.stats(user_id).await?)
    }

    /// Moves an order to `status`. Cancelling restores the stock of every
    /// line item exactly once.
    #[tracing::instrument(skip(self, reason))]
    pub async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let order = self.get_order(id).await?;
        self.transition(order, status, reason).await
    }

    /// Customer cancellation. Unknown order, foreign order and a status that
    /// can no longer be cancelled all look the same to the caller.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        id: Uuid,
        requesting_user_id: &str,
        reason: &str,
    ) -> Result<Order, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest("Cancel reason is required".into()));
        }
        let order = self.repo.get(id).await?.ok_or_else(denied)?;
        if order.user_id != requesting_user_id || !order.status.is_cancellable() {
            return Err(denied());
        }
        self.transition(order, OrderStatus::Cancelled, Some(reason.to_owned()))
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => denied(),
                other => other,
            })
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        id: Uuid,
        payment_status: PaymentStatus,
    ) -> Result<Order, AppError> {
        let mut order = self.get_order(id).await?;
        let expected = order.revision();
        order.set_payment_status(payment_status, Utc::now())?;
        let updated = self
            .repo
            .update(order, expected)
            .await?
            .ok_or_else(order_not_found)?;
        tracing::info!(order_number = %updated.order_number, %payment_status, "payment status updated");
        Ok(updated)
    }

    async fn transition(
        &self,
        mut order: Order,
        status: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let expected = order.revision();
        order.transition(status, reason, Utc::now())?;

        if status != OrderStatus::Cancelled {
            let updated = self
                .repo
                .update(order, expected)
                .await?
                .ok_or_else(order_not_found)?;
            tracing::info!(order_number = %updated.order_number, %status, "order status updated");
            return Ok(updated);
        }

        // Restore first, then claim the cancellation with a compare-and-swap;
        // a lost race hands the stock back.
        let restores: StockMoves = order
            .stock_lines()
            .into_iter()
            .map(|(id, qty)| (id, i64::from(qty)))
            .collect();
        self.apply_all(&restores).await.map_err(|(id, e)| {
            AppError::ProductFetch(format!("Failed to restore stock for product {id}: {e}"))
        })?;

        match self.repo.update(order, expected).await {
            Ok(Some(updated)) => {
                tracing::info!(order_number = %updated.order_number, "order cancelled, stock restored");
                Ok(updated)
            }
            Ok(None) => {
                self.revert(&restores).await;
                Err(order_not_found())
            }
            Err(e) => {
                self.revert(&restores).await;
                Err(e.into())
            }
        }
    }
}

fn stock_error(
    product_id: ProductId,
    err: DirectoryError,
    known: &HashMap<ProductId, ProductSnapshot>,
) -> AppError {
    match err {
        DirectoryError::NotFound(_) => AppError::NotFound(format!("Product {product_id} not found")),
        DirectoryError::InsufficientStock(_) => AppError::InsufficientStock(
            known
                .get(&product_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| product_id.to_string()),
        ),
        other => AppError::ProductFetch(format!("Failed to process product {product_id}: {other}")),
    }
}
