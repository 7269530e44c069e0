use async_trait::async_trait;

use crate::domain::product::{ProductId, ProductSnapshot};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("product {0} not found")]
    NotFound(ProductId),

    #[error("insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    #[error("product directory unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected product directory response: {0}")]
    Invalid(String),

    /// The request may have been applied but no answer arrived.
    #[error("stock update outcome unknown: {0}")]
    Indeterminate(String),
}

impl DirectoryError {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, DirectoryError::Indeterminate(_))
    }
}

/// Owner of product prices and stock levels.
#[async_trait]
pub trait ProductDirectory: Send + Sync + 'static {
    async fn get_product(&self, id: ProductId) -> Result<ProductSnapshot, DirectoryError>;

    /// Applies a signed stock delta: negative reserves, positive restores.
    /// `Indeterminate` means the delta may or may not have been applied.
    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<(), DirectoryError>;
}
