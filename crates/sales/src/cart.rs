use serde::{Deserialize, Serialize};

use stockroom_auth::Actor;
use stockroom_core::{DomainError, DomainResult, ProductId};
use stockroom_products::Catalog;

use crate::order::{DeliveryTime, OrderItem, PaymentMethod};

/// One line of the cart snapshot handed over at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub delivery: DeliveryTime,
}

impl CartLine {
    pub fn immediate(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            delivery: DeliveryTime::Immediate,
        }
    }

    pub fn backorder(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            delivery: DeliveryTime::Backorder,
        }
    }
}

/// Checkout request: who is buying, what, and how they pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer: Actor,
    pub lines: Vec<CartLine>,
    pub payment_method: PaymentMethod,
}

impl PlaceOrder {
    pub fn new(customer: Actor, lines: Vec<CartLine>, payment_method: PaymentMethod) -> Self {
        Self {
            customer,
            lines,
            payment_method,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("cart is empty"));
        }
        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(DomainError::invalid_quantity(
                    line.quantity,
                    format!("cart line for product {}", line.product_id),
                ));
            }
        }
        Ok(())
    }

    /// Order items with the catalog's current price and cost frozen in.
    pub fn snapshot_items(&self, catalog: &dyn Catalog) -> DomainResult<Vec<OrderItem>> {
        self.lines
            .iter()
            .map(|line| {
                let product = catalog.product(line.product_id)?;
                Ok(OrderItem {
                    product: line.product_id,
                    sales_point: None,
                    quantity: line.quantity,
                    price: product.price,
                    cost_price: product.cost_price,
                    delivery_time: line.delivery,
                    allocations: Vec::new(),
                })
            })
            .collect()
    }
}
