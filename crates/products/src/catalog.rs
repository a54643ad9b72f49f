use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockroom_core::{DomainError, DomainResult, ProductId};

use crate::Product;

/// Read access to the product catalog.
pub trait Catalog: Send + Sync {
    fn product(&self, id: ProductId) -> DomainResult<Product>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, id: ProductId) -> DomainResult<Product> {
        (**self).product(id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product (catalog-side edit).
    pub fn upsert(&self, product: Product) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product.id, product);
        }
    }

    pub fn set_price(&self, id: ProductId, price: u64) -> DomainResult<()> {
        let mut products = self
            .products
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))?;
        product.price = price;
        Ok(())
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> DomainResult<Product> {
        let products = self
            .products
            .read()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        products
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))
    }
}
