use serde::{Deserialize, Serialize};

use stockroom_core::ProductId;

/// Read-only view of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Current sale price in the smallest currency unit (e.g. cents).
    pub price: u64,
    /// Purchase cost in the smallest currency unit, when known.
    pub cost_price: Option<u64>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: u64) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            cost_price: None,
        }
    }

    pub fn with_cost_price(mut self, cost_price: u64) -> Self {
        self.cost_price = Some(cost_price);
        self
    }
}
