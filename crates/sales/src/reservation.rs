use std::collections::BTreeMap;
use std::sync::Arc;

use stockroom_core::{DomainError, DomainResult, ProductId, SalesPointId};
use stockroom_inventory::{StockBatch, StockId, StockLedger};

use crate::order::{Allocation, Order, OrderItem};

/// Spreads an order's immediate-delivery quantities over the stock rows of
/// each product.
///
/// The service never opens its own batch: callers lock the rows returned by
/// [`ReservationService::stock_rows`] and pass the [`StockBatch`] in, so the
/// stock change and the order write form one unit.
#[derive(Debug, Clone)]
pub struct ReservationService {
    ledger: Arc<StockLedger>,
}

impl ReservationService {
    pub fn new(ledger: Arc<StockLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    /// Every stock row holding a product of an immediate-delivery item.
    pub fn stock_rows(&self, items: &[OrderItem]) -> DomainResult<Vec<StockId>> {
        let mut ids = Vec::new();
        for product in immediate_demand(items)?.into_keys() {
            ids.extend(self.ledger.stock_ids_for_product(product)?);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Reserve every immediate item, returning one allocation list per item
    /// (empty for backorder items).
    ///
    /// All-or-nothing: the whole demand for each product is checked against
    /// its total available quantity before anything is reserved.
    pub fn reserve_for_order(
        &self,
        batch: &mut StockBatch,
        items: &[OrderItem],
        home: Option<SalesPointId>,
    ) -> DomainResult<Vec<Vec<Allocation>>> {
        for (product, requested) in immediate_demand(items)? {
            let available = batch
                .rows()
                .iter()
                .filter(|s| s.product == product)
                .map(|s| s.available())
                .fold(0, i64::saturating_add);
            if available < requested {
                return Err(DomainError::insufficient_stock(product, None, requested, available));
            }
        }

        let mut allocations = Vec::with_capacity(items.len());
        for item in items {
            if !item.is_immediate() {
                allocations.push(Vec::new());
                continue;
            }

            let mut remaining = item.quantity;
            let mut taken = Vec::new();
            for id in reservation_order(batch, item.product, home)? {
                if remaining == 0 {
                    break;
                }
                let row = batch.stock(id)?;
                let qty = row.available().min(remaining);
                if qty <= 0 {
                    continue;
                }
                let sales_point = row.sales_point;
                batch.reserve(id, qty)?;
                taken.push(Allocation {
                    stock_id: id,
                    sales_point,
                    quantity: qty,
                });
                remaining -= qty;
            }

            if remaining > 0 {
                return Err(DomainError::invariant(format!(
                    "product {} still short {remaining} units after allocation",
                    item.product
                )));
            }
            allocations.push(taken);
        }
        Ok(allocations)
    }

    /// Give back what the order holds, walking the rows it reserved from
    /// first and then any other row of the product in stock-id order.
    pub fn release_for_order(&self, batch: &mut StockBatch, order: &Order) -> DomainResult<()> {
        for item in order.items().iter().filter(|i| i.is_immediate()) {
            let held = reserved_total(batch, item.product);
            if held < item.quantity {
                return Err(DomainError::invariant(format!(
                    "order {} cannot release {} units of product {}: only {held} reserved",
                    order.id_typed(),
                    item.quantity,
                    item.product
                )));
            }
            walk_reserved(batch, item, |batch, id, qty| batch.release(id, qty))?;
        }
        Ok(())
    }

    /// Turn the order's reservations into on-hand deductions.
    pub fn fulfill_for_order(&self, batch: &mut StockBatch, order: &Order) -> DomainResult<()> {
        for item in order.items().iter().filter(|i| i.is_immediate()) {
            let reserved = reserved_total(batch, item.product);
            if reserved < item.quantity {
                tracing::error!(
                    order_id = %order.id_typed(),
                    product_id = %item.product,
                    required = item.quantity,
                    reserved,
                    "reservation does not cover shipment"
                );
                return Err(DomainError::Fulfillment {
                    product: item.product,
                    required: item.quantity,
                    reserved,
                });
            }
            walk_reserved(batch, item, |batch, id, qty| batch.commit_reserved(id, qty))?;
        }
        Ok(())
    }
}

/// Total immediate quantity per product.
fn immediate_demand(items: &[OrderItem]) -> DomainResult<BTreeMap<ProductId, i64>> {
    let mut demand = BTreeMap::new();
    for item in items.iter().filter(|i| i.is_immediate()) {
        let total: &mut i64 = demand.entry(item.product).or_insert(0);
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            DomainError::invalid_quantity(
                item.quantity,
                format!("combined demand for product {} overflows", item.product),
            )
        })?;
    }
    Ok(demand)
}

/// Rows of `product` with the home sales point first, then by stock id.
fn reservation_order(
    batch: &StockBatch,
    product: ProductId,
    home: Option<SalesPointId>,
) -> DomainResult<Vec<StockId>> {
    let mut keyed = Vec::new();
    for id in batch.ids_for_product(product) {
        let is_home = Some(batch.stock(id)?.sales_point) == home;
        keyed.push((!is_home, id));
    }
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, id)| id).collect())
}

fn reserved_total(batch: &StockBatch, product: ProductId) -> i64 {
    batch
        .rows()
        .iter()
        .filter(|s| s.product == product)
        .map(|s| s.reserved_quantity)
        .fold(0, i64::saturating_add)
}

fn walk_reserved(
    batch: &mut StockBatch,
    item: &OrderItem,
    mut take: impl FnMut(&mut StockBatch, StockId, i64) -> DomainResult<()>,
) -> DomainResult<()> {
    let mut order: Vec<StockId> = item.allocations.iter().map(|a| a.stock_id).collect();
    for id in batch.ids_for_product(item.product) {
        if !order.contains(&id) {
            order.push(id);
        }
    }

    let mut remaining = item.quantity;
    for id in order {
        if remaining == 0 {
            break;
        }
        // Rows outside this batch are skipped.
        let Ok(row) = batch.stock(id) else { continue };
        let qty = row.reserved_quantity.min(remaining);
        if qty <= 0 {
            continue;
        }
        take(batch, id, qty)?;
        remaining -= qty;
    }
    Ok(())
}
