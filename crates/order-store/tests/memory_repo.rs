#![cfg(feature = "memory")]

use chrono::Utc;
use order_store::memory::InMemoryRepo;
use order_types::domain::order::{
    Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use order_types::domain::product::ProductSnapshot;
use order_types::ports::order_repository::{OrderFilter, OrderRepository, RepoError};

fn sample_order(user_id: &str, price: i64, qty: u32) -> Order {
    let product = ProductSnapshot {
        id: 1,
        name: "Widget".into(),
        price,
        stock: 100,
        images: vec![],
        sku: "W-1".into(),
    };
    Order::place(
        user_id.into(),
        vec![OrderItem::snapshot(&product, qty).unwrap()],
        ShippingAddress {
            full_name: "Test".into(),
            phone: "0900".into(),
            address: "1 Main St".into(),
            city: "Hanoi".into(),
            district: Some("Ba Dinh".into()),
            postal_code: None,
        },
        PaymentMethod::Cash,
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn memory_repo_create_get_update_flow() {
    let repo = InMemoryRepo::new();
    let order = sample_order("u1", 500, 2);

    let created = repo.create(order.clone()).await.unwrap();
    assert_eq!(created.id, order.id);

    let fetched = repo.get(order.id).await.unwrap().unwrap();
    assert_eq!(fetched.items.len(), 1);
    let by_number = repo.get_by_number(&order.order_number).await.unwrap().unwrap();
    assert_eq!(by_number.id, order.id);

    let expected = fetched.revision();
    let mut shipped = fetched.clone();
    shipped
        .transition(OrderStatus::Shipped, None, Utc::now())
        .unwrap();
    let updated = repo.update(shipped, expected).await.unwrap().unwrap();
    assert_eq!(updated.status, OrderStatus::Shipped);
    assert!(updated.shipped_at.is_some());

    // A second writer holding the old revision loses.
    let mut stale = fetched;
    stale
        .transition(OrderStatus::Cancelled, None, Utc::now())
        .unwrap();
    let err = repo.update(stale, expected).await.unwrap_err();
    assert!(matches!(err, RepoError::StaleRevision(id) if id == order.id));
}

#[tokio::test]
async fn memory_repo_enforces_unique_keys() {
    let repo = InMemoryRepo::new();
    let first = sample_order("u1", 500, 1).with_idempotency_key(Some("k-1".into()));
    repo.create(first.clone()).await.unwrap();

    let retry = sample_order("u1", 500, 1).with_idempotency_key(Some("k-1".into()));
    let err = repo.create(retry).await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateIdempotencyKey(_)));

    // Same key for another user is a different request.
    let other = sample_order("u2", 500, 1).with_idempotency_key(Some("k-1".into()));
    repo.create(other).await.unwrap();

    let mut clash = sample_order("u3", 500, 1);
    clash.order_number = first.order_number.clone();
    let err = repo.create(clash).await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateOrderNumber(_)));

    let found = repo
        .find_by_idempotency_key("u1", "k-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id);
}

#[tokio::test]
async fn memory_repo_lists_newest_first_with_filters() {
    let repo = InMemoryRepo::new();
    let mut ids = Vec::new();
    for i in 0..5 {
        let owner = if i % 2 == 0 { "u1" } else { "u2" };
        let order = sample_order(owner, 100 * (i + 1), 1);
        ids.push(order.id);
        repo.create(order).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let page = repo
        .list(&OrderFilter {
            user_id: Some("u1".into()),
            limit: 2,
            ..OrderFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 2);
    assert_eq!(page.orders[0].id, ids[4]);
    assert_eq!(page.orders[1].id, ids[2]);

    let second = repo
        .list(&OrderFilter {
            user_id: Some("u1".into()),
            page: 2,
            limit: 2,
            ..OrderFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(second.orders.len(), 1);
    assert_eq!(second.orders[0].id, ids[0]);

    let paid = repo
        .list(&OrderFilter {
            payment_status: Some(PaymentStatus::Paid),
            ..OrderFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(paid.total, 0);
}

#[tokio::test]
async fn memory_repo_stats_are_scoped() {
    let repo = InMemoryRepo::new();
    repo.create(sample_order("u1", 100_000, 2)).await.unwrap();
    repo.create(sample_order("u1", 600_000, 1)).await.unwrap();
    repo.create(sample_order("u2", 10_000, 1)).await.unwrap();

    let mine = repo.stats(Some("u1")).await.unwrap();
    assert_eq!(mine.total_orders, 2);
    assert_eq!(mine.total_revenue, 225_000 + 600_000);
    assert_eq!(mine.average_order_value, 412_500.0);
    assert_eq!(mine.by_status.len(), 1);
    assert_eq!(mine.by_status[0].count, 2);

    let all = repo.stats(None).await.unwrap();
    assert_eq!(all.total_orders, 3);

    let nobody = repo.stats(Some("ghost")).await.unwrap();
    assert_eq!(nobody.total_orders, 0);
    assert_eq!(nobody.average_order_value, 0.0);
}

#[tokio::test]
async fn memory_repo_handles_missing_rows() {
    let repo = InMemoryRepo::new();
    let missing = repo.get(uuid::Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
    assert!(repo.get_by_number("ORD-NOPE-0000").await.unwrap().is_none());

    let ghost = sample_order("u1", 100, 1);
    let expected = ghost.revision();
    let updated = repo.update(ghost, expected).await.unwrap();
    assert!(updated.is_none());
}
