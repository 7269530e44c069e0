use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::product::{ProductId, ProductSnapshot};

/// Orders at or above this subtotal ship for free.
pub const FREE_SHIPPING_THRESHOLD: i64 = 500_000;
pub const FLAT_SHIPPING_COST: i64 = 25_000;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("cannot change payment status from {from} to {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("order amount overflow")]
    AmountOverflow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    /// Targets reachable from this status. Self-transitions are never allowed.
    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Processing, Shipped, Delivered, Cancelled],
            Confirmed => &[Processing, Shipped, Delivered, Cancelled],
            Processing => &[Shipped, Delivered],
            Shipped => &[Delivered],
            Delivered => &[Refunded],
            Cancelled => &[Refunded],
            Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_targets().contains(&next)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown order status {s}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::Validation(format!("unknown payment status {s}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Online => "ONLINE",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "CARD" => Ok(PaymentMethod::Card),
            "ONLINE" => Ok(PaymentMethod::Online),
            other => Err(DomainError::Validation(format!(
                "unknown payment method {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl ShippingAddress {
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("fullName", &self.full_name),
            ("phone", &self.phone),
            ("address", &self.address),
            ("city", &self.city),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "shippingAddress.{field} is required"
                )));
            }
        }
        Ok(())
    }
}

/// One requested line of a new order, before it is priced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub items: Vec<NewOrderLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::Validation(
                "At least one item required".into(),
            ));
        }
        for line in &self.items {
            if line.product_id < 1 {
                return Err(DomainError::Validation(format!(
                    "invalid product id {}",
                    line.product_id
                )));
            }
            if line.quantity < 1 {
                return Err(DomainError::Validation(
                    "Quantity must be at least 1".into(),
                ));
            }
        }
        self.shipping_address.validate()
    }

    /// Requested quantity per product, in first-seen order. Duplicate lines
    /// for the same product are summed so stock is checked against the total.
    pub fn quantities_by_product(&self) -> Vec<(ProductId, u64)> {
        let mut totals: Vec<(ProductId, u64)> = Vec::new();
        for line in &self.items {
            match totals.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, qty)) => *qty += u64::from(line.quantity),
                None => totals.push((line.product_id, u64::from(line.quantity))),
            }
        }
        totals
    }
}

pub fn validate_idempotency_key(key: &str) -> Result<(), DomainError> {
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(DomainError::Validation(format!(
            "Idempotency-Key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(DomainError::Validation(
            "Idempotency-Key must be visible ASCII".into(),
        ));
    }
    Ok(())
}

/// Line item with the product frozen as it was at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_image: Option<String>,
    pub product_sku: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub total_price: i64,
}

impl OrderItem {
    pub fn snapshot(product: &ProductSnapshot, quantity: u32) -> Result<Self, DomainError> {
        let total_price = product
            .price
            .checked_mul(i64::from(quantity))
            .ok_or(DomainError::AmountOverflow)?;
        Ok(Self {
            id: Uuid::new_v4(),
            product_id: product.id,
            product_name: product.name.clone(),
            product_image: product.primary_image().map(str::to_owned),
            product_sku: product.sku.clone(),
            quantity,
            unit_price: product.price,
            total_price,
        })
    }
}

/// Status pair an update was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub discount: i64,
    pub total_amount: i64,
    pub shipping_address: ShippingAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds a `PENDING` order from already-priced line items.
    pub fn place(
        user_id: String,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        notes: Option<String>,
    ) -> Result<Self, DomainError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user id required".into()));
        }
        if items.is_empty() {
            return Err(DomainError::Validation(
                "At least one item required".into(),
            ));
        }
        shipping_address.validate()?;

        let subtotal = items.iter().try_fold(0i64, |acc, it| {
            acc.checked_add(it.total_price)
                .ok_or(DomainError::AmountOverflow)
        })?;
        let shipping_cost = shipping_cost_for(subtotal);
        let discount = 0;
        let total_amount = subtotal
            .checked_add(shipping_cost)
            .and_then(|t| t.checked_sub(discount))
            .ok_or(DomainError::AmountOverflow)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            order_number: generate_order_number(now),
            user_id,
            idempotency_key: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method,
            subtotal,
            shipping_cost,
            discount,
            total_amount,
            shipping_address,
            notes: notes.filter(|n| !n.trim().is_empty()),
            cancel_reason: None,
            items,
            created_at: now,
            updated_at: now,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
        })
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn regenerate_number(&mut self) {
        self.order_number = generate_order_number(Utc::now());
    }

    pub fn revision(&self) -> Revision {
        Revision {
            status: self.status,
            payment_status: self.payment_status,
        }
    }

    /// Stock held by this order, one entry per line item.
    pub fn stock_lines(&self) -> Vec<(ProductId, u32)> {
        self.items
            .iter()
            .map(|it| (it.product_id, it.quantity))
            .collect()
    }

    /// Moves the order to `next`, applying the status side effects. Stock is
    /// not touched here.
    pub fn transition(
        &mut self,
        next: OrderStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            OrderStatus::Shipped => self.shipped_at = Some(now),
            OrderStatus::Delivered => {
                self.delivered_at = Some(now);
                // Delivery settles payment (cash on delivery included).
                self.payment_status = PaymentStatus::Paid;
            }
            OrderStatus::Cancelled => {
                self.cancelled_at = Some(now);
                self.cancel_reason = reason.filter(|r| !r.trim().is_empty());
            }
            OrderStatus::Refunded => {
                if self.payment_status == PaymentStatus::Paid {
                    self.payment_status = PaymentStatus::Refunded;
                }
            }
            _ => {}
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn set_payment_status(
        &mut self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.payment_status.can_transition_to(next) {
            return Err(DomainError::InvalidPaymentTransition {
                from: self.payment_status,
                to: next,
            });
        }
        self.payment_status = next;
        if next == PaymentStatus::Paid && self.status == OrderStatus::Pending {
            self.status = OrderStatus::Confirmed;
        }
        self.updated_at = now;
        Ok(())
    }
}

pub fn shipping_cost_for(subtotal: i64) -> i64 {
    if subtotal >= FREE_SHIPPING_THRESHOLD {
        0
    } else {
        FLAT_SHIPPING_COST
    }
}

/// `ORD-<base36 millis>-<4 random base36>`. Sorts roughly by creation time,
/// but not strictly.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("ORD-{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Nguyen An".into(),
            phone: "0900000000".into(),
            address: "1 Le Loi".into(),
            city: "HCMC".into(),
            district: None,
            postal_code: None,
        }
    }

    fn product(price: i64) -> ProductSnapshot {
        ProductSnapshot {
            id: 1,
            name: "Tee".into(),
            price,
            stock: 10,
            images: vec!["tee.png".into()],
            sku: "TEE-1".into(),
        }
    }

    fn placed(price: i64, qty: u32) -> Order {
        let item = OrderItem::snapshot(&product(price), qty).unwrap();
        Order::place(
            "user-1".into(),
            vec![item],
            address(),
            PaymentMethod::Cash,
            None,
        )
        .unwrap()
    }

    #[test]
    fn new_order_computes_totals_and_defaults_pending() {
        let order = placed(100_000, 2);
        assert_eq!(order.subtotal, 200_000);
        assert_eq!(order.shipping_cost, 25_000);
        assert_eq!(order.total_amount, 225_000);
        assert_eq!(order.total_amount, order.subtotal + order.shipping_cost - order.discount);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.items[0].product_image.as_deref(), Some("tee.png"));
        assert_eq!(order.items[0].total_price, 200_000);
    }

    #[test]
    fn shipping_is_free_from_threshold() {
        assert_eq!(shipping_cost_for(499_999), FLAT_SHIPPING_COST);
        assert_eq!(shipping_cost_for(500_000), 0);
        assert_eq!(placed(250_000, 2).shipping_cost, 0);
    }

    #[test]
    fn order_numbers_have_expected_shape_and_are_unique() {
        let now = Utc::now();
        let numbers: HashSet<String> = (0..500).map(|_| generate_order_number(now)).collect();
        // Same millisecond, so uniqueness comes from the suffix alone.
        assert!(numbers.len() > 490);
        for n in &numbers {
            let parts: Vec<&str> = n.split('-').collect();
            assert_eq!(parts.len(), 3);
            assert_eq!(parts[0], "ORD");
            assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
            assert_eq!(parts[2].len(), 4);
        }
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn validation_errors() {
        let empty = NewOrder {
            items: vec![],
            shipping_address: address(),
            payment_method: PaymentMethod::Card,
            notes: None,
        };
        assert!(empty.validate().is_err());

        let zero_qty = NewOrder {
            items: vec![NewOrderLine {
                product_id: 1,
                quantity: 0,
            }],
            ..empty.clone()
        };
        assert!(zero_qty.validate().is_err());

        let mut blank_city = address();
        blank_city.city = "  ".into();
        let no_city = NewOrder {
            items: vec![NewOrderLine {
                product_id: 1,
                quantity: 1,
            }],
            shipping_address: blank_city,
            ..empty.clone()
        };
        assert_eq!(
            no_city.validate(),
            Err(DomainError::Validation(
                "shippingAddress.city is required".into()
            ))
        );

        assert!("BITCOIN".parse::<PaymentMethod>().is_err());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("has space").is_err());
        assert!(validate_idempotency_key("checkout-42").is_ok());
    }

    #[test]
    fn duplicate_lines_are_summed_per_product() {
        let order = NewOrder {
            items: vec![
                NewOrderLine { product_id: 7, quantity: 2 },
                NewOrderLine { product_id: 3, quantity: 1 },
                NewOrderLine { product_id: 7, quantity: 4 },
            ],
            shipping_address: address(),
            payment_method: PaymentMethod::Cash,
            notes: None,
        };
        assert_eq!(order.quantities_by_product(), vec![(7, 6), (3, 1)]);
    }

    #[test]
    fn delivered_forces_paid() {
        for payment in [PaymentStatus::Pending, PaymentStatus::Failed] {
            let mut order = placed(1_000, 1);
            order.payment_status = payment;
            order.transition(OrderStatus::Delivered, None, Utc::now()).unwrap();
            assert_eq!(order.payment_status, PaymentStatus::Paid);
            assert!(order.delivered_at.is_some());
        }
    }

    #[test]
    fn cancel_records_reason_and_timestamp() {
        let mut order = placed(1_000, 1);
        order
            .transition(OrderStatus::Cancelled, Some("changed mind".into()), Utc::now())
            .unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancel_reason.as_deref(), Some("changed mind"));
        assert!(order.cancelled_at.is_some());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut order = placed(1_000, 1);
        order.transition(OrderStatus::Shipped, None, Utc::now()).unwrap();
        assert!(order.shipped_at.is_some());
        let err = order
            .transition(OrderStatus::Cancelled, None, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled
            }
        );
        order.transition(OrderStatus::Delivered, None, Utc::now()).unwrap();
        assert!(order.transition(OrderStatus::Pending, None, Utc::now()).is_err());
        assert!(order.transition(OrderStatus::Delivered, None, Utc::now()).is_err());

        order.transition(OrderStatus::Refunded, None, Utc::now()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        for next in OrderStatus::ALL {
            assert!(!OrderStatus::Refunded.can_transition_to(next));
        }
    }

    #[test]
    fn only_pending_and_confirmed_are_cancellable() {
        for status in OrderStatus::ALL {
            assert_eq!(
                status.is_cancellable(),
                status.can_transition_to(OrderStatus::Cancelled),
                "{status}"
            );
        }
    }

    #[test]
    fn payment_confirmation_confirms_pending_order() {
        let mut order = placed(1_000, 1);
        order.set_payment_status(PaymentStatus::Paid, Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(order
            .set_payment_status(PaymentStatus::Failed, Utc::now())
            .is_err());
        order.set_payment_status(PaymentStatus::Refunded, Utc::now()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn status_strings_round_trip() {
        assert_eq!("SHIPPED".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!("PAID".parse::<PaymentStatus>().unwrap(), PaymentStatus::Paid);
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }
}
