//! Product catalog collaborator.
//!
//! The catalog is owned elsewhere; the ledger consumes it as a fast,
//! read-only reference (a retryable lookup, never mutated from here).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use apotheca_core::{DomainError, DomainResult, ProductId};

/// Coarse product classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    Prescription,
    OverTheCounter,
    QuasiDrug,
}

/// Read-only product reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub name: String,
    /// List price in the smallest currency unit. Orders snapshot their own
    /// unit prices at creation time; this is reference data only.
    pub unit_price: i64,
    pub category: ProductCategory,
}

/// Catalog lookup contract consumed by the workflows.
pub trait Catalog: Send + Sync {
    /// Fails with [`DomainError::NotFound`] if the product does not exist.
    fn lookup(&self, product_id: ProductId) -> DomainResult<ProductInfo>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn lookup(&self, product_id: ProductId) -> DomainResult<ProductInfo> {
        (**self).lookup(product_id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ProductInfo) {
        if let Ok(mut map) = self.products.write() {
            map.insert(info.product_id, info);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn lookup(&self, product_id: ProductId) -> DomainResult<ProductInfo> {
        let map = self
            .products
            .read()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))?;
        map.get(&product_id).cloned().ok_or(DomainError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_missing_product_is_not_found() {
        let catalog = InMemoryCatalog::new();
        assert_eq!(
            catalog.lookup(ProductId::new()).unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn lookup_returns_inserted_product() {
        let catalog = InMemoryCatalog::new();
        let id = ProductId::new();
        catalog.insert(ProductInfo {
            product_id: id,
            name: "Acetaminophen 500mg".to_string(),
            unit_price: 1200,
            category: ProductCategory::OverTheCounter,
        });

        let info = catalog.lookup(id).unwrap();
        assert_eq!(info.name, "Acetaminophen 500mg");
        assert_eq!(info.unit_price, 1200);
    }
}
