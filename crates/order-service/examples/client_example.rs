///  To run :
///  cargo r --example client_example
use order_client::{ApiError, ListQuery, OrdersClient};
use order_store::build_repo;
use order_types::domain::order::{
    NewOrder, NewOrderLine, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use order_types::domain::product::ProductSnapshot;
use order_workflow::application::order_service::OrderService;
use order_workflow::inbound::http::{HttpServer, HttpServerConfig};
use order_workflow::outbound::InMemoryProductDirectory;
use tempfile::tempdir;

fn find_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port = find_free_port();
    let addr = format!("http://127.0.0.1:{port}/");

    // Use a temp file-backed SQLite DB so multiple connections see the same data.
    let tmp = tempdir()?;
    let db_path = tmp.path().join("orders.db");
    let db_url = format!("sqlite://{}", db_path.display());

    // Stand-in catalogue so the demo runs without the product service.
    let products = InMemoryProductDirectory::with_products([
        ProductSnapshot {
            id: 1,
            name: "Espresso Beans 1kg".into(),
            price: 320_000,
            stock: 20,
            images: vec!["beans.jpg".into()],
            sku: "BEAN-1KG".into(),
        },
        ProductSnapshot {
            id: 2,
            name: "Pour-over Kettle".into(),
            price: 450_000,
            stock: 3,
            images: vec![],
            sku: "KETTLE-1".into(),
        },
    ]);

    let repo = build_repo(Some(&db_url)).await?;
    let service = OrderService::new(repo, products.clone());
    let server = HttpServer::new(
        service,
        HttpServerConfig {
            port: port.to_string(),
        },
    )
    .await?;

    let handle = tokio::spawn(async move {
        server.run().await.expect("server run");
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let customer = OrdersClient::builder(&addr)?.as_user("demo-customer")?.build()?;
    let admin = OrdersClient::builder(&addr)?
        .as_user("demo-admin")?
        .as_admin()?
        .build()?;

    let request = NewOrder {
        items: vec![
            NewOrderLine {
                product_id: 1,
                quantity: 1,
            },
            NewOrderLine {
                product_id: 2,
                quantity: 1,
            },
        ],
        shipping_address: ShippingAddress {
            full_name: "Demo Customer".into(),
            phone: "0900000000".into(),
            address: "1 Demo Street".into(),
            city: "Hanoi".into(),
            district: None,
            postal_code: None,
        },
        payment_method: PaymentMethod::Cash,
        notes: None,
    };

    let created = customer.create_order(&request, Some("demo-checkout")).await?;
    let order = created.order;
    println!(
        "Created {} total={} (shipping {})",
        order.order_number, order.total_amount, order.shipping_cost
    );
    assert_eq!(order.shipping_cost, 0);

    let replay = customer.create_order(&request, Some("demo-checkout")).await?;
    println!("Retry with same key replayed={}", replay.replayed);
    assert_eq!(replay.order.id, order.id);

    let paid = admin
        .update_payment_status(order.id, PaymentStatus::Paid)
        .await?;
    println!("Payment {:?}, order {:?}", paid.payment_status, paid.status);

    let shipped = admin.update_status(order.id, OrderStatus::Shipped, None).await?;
    println!("Shipped at {:?}", shipped.shipped_at);

    // Shipped orders can no longer be cancelled by the customer.
    match customer.cancel_order(order.id, "too slow").await {
        Ok(_) => anyhow::bail!("cancel should have been refused"),
        Err(err) => match err.downcast_ref::<ApiError>() {
            Some(api) => println!("Cancel refused: {} {}", api.status, api.message),
            None => return Err(err),
        },
    }

    let page = customer.list_orders(&ListQuery::default()).await?;
    println!("Customer has {} order(s)", page.total);
    let stats = admin.stats().await?;
    println!(
        "Store: {} orders, revenue {}, stock left for kettle: {:?}",
        stats.total_orders,
        stats.total_revenue,
        products.stock(2)
    );

    handle.abort();
    Ok(())
}
