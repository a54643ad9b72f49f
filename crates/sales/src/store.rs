use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use stockroom_core::{AggregateRoot, DomainError, DomainResult, OrderId, ProductId, UserId};

use crate::order::Order;

/// In-memory order store.
///
/// Each order sits behind its own mutex so status changes on one order
/// serialize without blocking the others. Items never change after an order
/// is placed, which keeps the product index exact.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<BTreeMap<OrderId, Arc<Mutex<Order>>>>,
    ordered_products: RwLock<HashSet<ProductId>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) -> DomainResult<()> {
        let id = *order.id();
        let products: Vec<ProductId> = order.items().iter().map(|i| i.product).collect();

        let mut orders = self
            .orders
            .write()
            .map_err(|_| DomainError::invariant("order store lock poisoned"))?;
        if orders.contains_key(&id) {
            return Err(DomainError::conflict(format!("order {id} already exists")));
        }
        orders.insert(id, Arc::new(Mutex::new(order)));

        self.ordered_products
            .write()
            .map_err(|_| DomainError::invariant("order product index lock poisoned"))?
            .extend(products);
        Ok(())
    }

    pub fn get(&self, id: OrderId) -> DomainResult<Order> {
        let handle = self.handle(id)?;
        let order = handle
            .lock()
            .map_err(|_| DomainError::invariant("order lock poisoned"))?;
        Ok(order.clone())
    }

    /// Shared handle for read-modify-write under the order's own lock.
    pub fn handle(&self, id: OrderId) -> DomainResult<Arc<Mutex<Order>>> {
        self.orders
            .read()
            .map_err(|_| DomainError::invariant("order store lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("order {id}")))
    }

    pub fn len(&self) -> DomainResult<usize> {
        Ok(self
            .orders
            .read()
            .map_err(|_| DomainError::invariant("order store lock poisoned"))?
            .len())
    }

    pub fn is_empty(&self) -> DomainResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn for_customer(&self, customer: UserId) -> DomainResult<Vec<Order>> {
        let handles: Vec<Arc<Mutex<Order>>> = self
            .orders
            .read()
            .map_err(|_| DomainError::invariant("order store lock poisoned"))?
            .values()
            .cloned()
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            let order = handle
                .lock()
                .map_err(|_| DomainError::invariant("order lock poisoned"))?;
            if order.customer() == customer {
                out.push(order.clone());
            }
        }
        Ok(out)
    }

    /// Whether any order line, in any status, references the product.
    pub fn has_ordered(&self, product: ProductId) -> DomainResult<bool> {
        Ok(self
            .ordered_products
            .read()
            .map_err(|_| DomainError::invariant("order product index lock poisoned"))?
            .contains(&product))
    }
}
