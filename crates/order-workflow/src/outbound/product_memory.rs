use async_trait::async_trait;
use dashmap::DashMap;
use order_types::domain::product::{ProductId, ProductSnapshot};
use order_types::ports::product_directory::{DirectoryError, ProductDirectory};
use std::sync::{Arc, Mutex};

/// Product directory held in process. Records every applied stock delta and
/// can be told to fail adjustments for chosen products. An injected
/// `Indeterminate` error is returned after the delta has been applied.
#[derive(Clone, Default)]
pub struct InMemoryProductDirectory {
    products: Arc<DashMap<ProductId, ProductSnapshot>>,
    failing: Arc<DashMap<ProductId, DirectoryError>>,
    adjustments: Arc<Mutex<Vec<(ProductId, i64)>>>,
}

impl InMemoryProductDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductSnapshot>) -> Self {
        let dir = Self::new();
        for p in products {
            dir.insert(p);
        }
        dir
    }

    pub fn insert(&self, product: ProductSnapshot) {
        self.products.insert(product.id, product);
    }

    pub fn stock(&self, id: ProductId) -> Option<i64> {
        self.products.get(&id).map(|p| p.stock)
    }

    /// Applied deltas in call order.
    pub fn adjustments(&self) -> Vec<(ProductId, i64)> {
        self.adjustments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn fail_adjustments_for(&self, id: ProductId, error: DirectoryError) {
        self.failing.insert(id, error);
    }

    pub fn clear_failure(&self, id: ProductId) {
        self.failing.remove(&id);
    }
}

#[async_trait]
impl ProductDirectory for InMemoryProductDirectory {
    async fn get_product(&self, id: ProductId) -> Result<ProductSnapshot, DirectoryError> {
        self.products
            .get(&id)
            .map(|p| p.clone())
            .ok_or(DirectoryError::NotFound(id))
    }

    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<(), DirectoryError> {
        let injected = self.failing.get(&id).map(|e| e.clone());
        if let Some(err) = &injected {
            if !err.is_indeterminate() {
                return Err(err.clone());
            }
        }
        let mut product = self
            .products
            .get_mut(&id)
            .ok_or(DirectoryError::NotFound(id))?;
        let next = product.stock + delta;
        if next < 0 {
            return Err(DirectoryError::InsufficientStock(id));
        }
        product.stock = next;
        drop(product);

        self.adjustments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, delta));
        // An indeterminate failure lands the delta but loses the answer.
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
