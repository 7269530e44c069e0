#[cfg(not(any(feature = "memory", feature = "sqlite")))]
compile_error!("Enable a store feature: `memory` or `sqlite`.");

use order_types::domain::order::{Order, Revision};
use order_types::ports::order_repository::{
    OrderFilter, OrderPage, OrderRepository, OrderStats, RepoError,
};
use uuid::Uuid;

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Order store selected at startup from the enabled features and the
/// configured database URL.
pub enum Repo {
    #[cfg(feature = "memory")]
    Memory(memory::InMemoryRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteRepo),
}

pub async fn build_repo(url: Option<&str>) -> anyhow::Result<Repo> {
    Repo::build_repo(url).await
}

impl Repo {
    #[cfg(all(feature = "memory", not(feature = "sqlite")))]
    pub async fn build_repo(database_url: Option<&str>) -> anyhow::Result<Self> {
        if database_url.is_some() {
            tracing::warn!("DATABASE_URL ignored: built without the `sqlite` feature");
        }
        tracing::info!("using in-memory order store");
        Ok(Repo::Memory(memory::InMemoryRepo::new()))
    }

    #[cfg(all(feature = "sqlite", not(feature = "memory")))]
    pub async fn build_repo(database_url: Option<&str>) -> anyhow::Result<Self> {
        let url = database_url.unwrap_or("sqlite://orders.db");
        tracing::info!(url, "using sqlite order store");
        Ok(Repo::Sqlite(sqlite::SqliteRepo::new(url).await?))
    }

    // Both compiled in: an explicit URL selects SQLite.
    #[cfg(all(feature = "sqlite", feature = "memory"))]
    pub async fn build_repo(database_url: Option<&str>) -> anyhow::Result<Self> {
        match database_url {
            Some(url) => {
                tracing::info!(url, "using sqlite order store");
                Ok(Repo::Sqlite(sqlite::SqliteRepo::new(url).await?))
            }
            None => {
                tracing::info!("using in-memory order store");
                Ok(Repo::Memory(memory::InMemoryRepo::new()))
            }
        }
    }

    fn backend(&self) -> &dyn OrderRepository {
        match self {
            #[cfg(feature = "memory")]
            Repo::Memory(repo) => repo,
            #[cfg(feature = "sqlite")]
            Repo::Sqlite(repo) => repo,
        }
    }
}

#[async_trait::async_trait]
impl OrderRepository for Repo {
    async fn create(&self, order: Order) -> Result<Order, RepoError> {
        self.backend().create(order).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        self.backend().get(id).await
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepoError> {
        self.backend().get_by_number(order_number).await
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        self.backend().find_by_idempotency_key(user_id, key).await
    }

    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepoError> {
        self.backend().list(filter).await
    }

    async fn update(&self, order: Order, expected: Revision) -> Result<Option<Order>, RepoError> {
        self.backend().update(order, expected).await
    }

    async fn stats(&self, user_id: Option<&str>) -> Result<OrderStats, RepoError> {
        self.backend().stats(user_id).await
    }
}
