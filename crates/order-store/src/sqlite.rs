use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use order_types::domain::order::{
    Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, Revision, ShippingAddress,
};
use order_types::ports::order_repository::{
    OrderFilter, OrderPage, OrderRepository, OrderStats, RepoError, StatusCount,
};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, order_number, user_id, idempotency_key, status, payment_status, \
     payment_method, subtotal, shipping_cost, discount, total_amount, shipping_address, notes, \
     cancel_reason, created_at, updated_at, shipped_at, delivered_at, cancelled_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, product_image, product_sku, \
     quantity, unit_price, total_price";

pub struct SqliteRepo {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct DbOrder {
    id: String,
    order_number: String,
    user_id: String,
    idempotency_key: Option<String>,
    status: String,
    payment_status: String,
    payment_method: String,
    subtotal: i64,
    shipping_cost: i64,
    discount: i64,
    total_amount: i64,
    shipping_address: String,
    notes: Option<String>,
    cancel_reason: Option<String>,
    created_at: String,
    updated_at: String,
    shipped_at: Option<String>,
    delivered_at: Option<String>,
    cancelled_at: Option<String>,
}

#[derive(FromRow)]
struct DbItem {
    id: String,
    order_id: String,
    product_id: i64,
    product_name: String,
    product_image: Option<String>,
    product_sku: String,
    quantity: i64,
    unit_price: i64,
    total_price: i64,
}

fn db_err(e: impl ToString) -> RepoError {
    RepoError::DbError(e.to_string())
}

fn ts(at: DateTime<Utc>) -> String {
    // Fixed precision keeps lexical order equal to chronological order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, RepoError> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(db_err)?
        .with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepoError> {
    raw.as_deref().map(parse_ts).transpose()
}

impl DbItem {
    fn into_item(self) -> Result<OrderItem, RepoError> {
        Ok(OrderItem {
            id: Uuid::parse_str(&self.id).map_err(db_err)?,
            product_id: self.product_id,
            product_name: self.product_name,
            product_image: self.product_image,
            product_sku: self.product_sku,
            quantity: u32::try_from(self.quantity).map_err(db_err)?,
            unit_price: self.unit_price,
            total_price: self.total_price,
        })
    }
}

impl DbOrder {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, RepoError> {
        let shipping_address: ShippingAddress =
            serde_json::from_str(&self.shipping_address).map_err(db_err)?;
        Ok(Order {
            id: Uuid::parse_str(&self.id).map_err(db_err)?,
            order_number: self.order_number,
            user_id: self.user_id,
            idempotency_key: self.idempotency_key,
            status: OrderStatus::from_str(&self.status).map_err(db_err)?,
            payment_status: PaymentStatus::from_str(&self.payment_status).map_err(db_err)?,
            payment_method: PaymentMethod::from_str(&self.payment_method).map_err(db_err)?,
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            discount: self.discount,
            total_amount: self.total_amount,
            shipping_address,
            notes: self.notes,
            cancel_reason: self.cancel_reason,
            items,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            shipped_at: parse_opt_ts(self.shipped_at)?,
            delivered_at: parse_opt_ts(self.delivered_at)?,
            cancelled_at: parse_opt_ts(self.cancelled_at)?,
        })
    }
}

fn insert_err(e: sqlx::Error, order: &Order) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            if db.message().contains("order_number") {
                return RepoError::DuplicateOrderNumber(order.order_number.clone());
            }
            if let Some(key) = &order.idempotency_key {
                return RepoError::DuplicateIdempotencyKey(key.clone());
            }
        }
    }
    db_err(e)
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &OrderFilter) {
    let mut sep = " WHERE ";
    if let Some(user_id) = &filter.user_id {
        qb.push(sep).push("user_id = ").push_bind(user_id.clone());
        sep = " AND ";
    }
    if let Some(status) = filter.status {
        qb.push(sep).push("status = ").push_bind(status.as_str());
        sep = " AND ";
    }
    if let Some(payment_status) = filter.payment_status {
        qb.push(sep)
            .push("payment_status = ")
            .push_bind(payment_status.as_str());
    }
}

impl SqliteRepo {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options).await?;

        let ddl = include_str!("../migrations/0001_create_orders.sql");
        for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        tracing::debug!(url = database_url, "sqlite order store ready");

        Ok(Self { pool })
    }

    async fn items_for(&self, order_ids: &[String]) -> Result<HashMap<String, Vec<OrderItem>>, RepoError> {
        let mut grouped: HashMap<String, Vec<OrderItem>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(grouped);
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id IN ("
        ));
        let mut ids = qb.separated(", ");
        for id in order_ids {
            ids.push_bind(id.clone());
        }
        qb.push(") ORDER BY order_id, position");

        let rows: Vec<DbItem> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        for row in rows {
            let order_id = row.order_id.clone();
            grouped.entry(order_id).or_default().push(row.into_item()?);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<DbOrder>) -> Result<Vec<Order>, RepoError> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut items = self.items_for(&ids).await?;
        rows.into_iter()
            .map(|r| {
                let order_items = items.remove(&r.id).unwrap_or_default();
                r.into_order(order_items)
            })
            .collect()
    }

    async fn fetch_one_where(&self, column: &str, value: String) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderRepository for SqliteRepo {
    async fn create(&self, order: Order) -> Result<Order, RepoError> {
        let address = serde_json::to_string(&order.shipping_address).map_err(db_err)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(order.id.to_string())
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(&order.idempotency_key)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.subtotal)
        .bind(order.shipping_cost)
        .bind(order.discount)
        .bind(order.total_amount)
        .bind(address)
        .bind(&order.notes)
        .bind(&order.cancel_reason)
        .bind(ts(order.created_at))
        .bind(ts(order.updated_at))
        .bind(order.shipped_at.map(ts))
        .bind(order.delivered_at.map(ts))
        .bind(order.cancelled_at.map(ts))
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_err(e, &order))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, position, product_id, product_name, product_image,
                 product_sku, quantity, unit_price, total_price)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id.to_string())
            .bind(order.id.to_string())
            .bind(position as i64)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(&item.product_image)
            .bind(&item.product_sku)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        self.fetch_one_where("id", id.to_string()).await
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepoError> {
        self.fetch_one_where("order_number", order_number.to_owned())
            .await
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ? AND idempotency_key = ?"
        ))
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepoError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM orders");
        push_filters(&mut count, filter);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);
        let rows: Vec<DbOrder> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(OrderPage {
            orders: self.hydrate(rows).await?,
            total: total as u64,
        })
    }

    async fn update(&self, order: Order, expected: Revision) -> Result<Option<Order>, RepoError> {
        let updated = sqlx::query(
            "UPDATE orders SET status = ?, payment_status = ?, cancel_reason = ?, updated_at = ?,
             shipped_at = ?, delivered_at = ?, cancelled_at = ?
             WHERE id = ? AND status = ? AND payment_status = ?",
        )
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.cancel_reason)
        .bind(ts(order.updated_at))
        .bind(order.shipped_at.map(ts))
        .bind(order.delivered_at.map(ts))
        .bind(order.cancelled_at.map(ts))
        .bind(order.id.to_string())
        .bind(expected.status.as_str())
        .bind(expected.payment_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM orders WHERE id = ?")
                .bind(order.id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            return match exists {
                Some(_) => Err(RepoError::StaleRevision(order.id)),
                None => Ok(None),
            };
        }
        self.get(order.id).await
    }

    async fn stats(&self, user_id: Option<&str>) -> Result<OrderStats, RepoError> {
        let (count, revenue, average): (i64, i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(total_amount), 0), AVG(total_amount)
             FROM orders WHERE (? IS NULL OR user_id = ?)",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM orders WHERE (? IS NULL OR user_id = ?) GROUP BY status",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut by_status = rows
            .into_iter()
            .map(|(status, count)| {
                Ok(StatusCount {
                    status: OrderStatus::from_str(&status).map_err(db_err)?,
                    count: count as u64,
                })
            })
            .collect::<Result<Vec<_>, RepoError>>()?;
        by_status.sort_by_key(|c| OrderStatus::ALL.iter().position(|s| *s == c.status));

        Ok(OrderStats {
            total_orders: count as u64,
            total_revenue: revenue,
            average_order_value: average.unwrap_or(0.0),
            by_status,
        })
    }
}
