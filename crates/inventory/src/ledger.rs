use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use stockroom_auth::{Actor, can_act_on_sales_point};
use stockroom_core::{DomainError, DomainResult, ProductId, SalesPointId};

use crate::movement::{MovementId, StockMovement, reason};
use crate::stock::{DEFAULT_LOW_STOCK_THRESHOLD, Stock, StockId, StockKey};

#[derive(Debug, Default)]
struct RowTable {
    by_id: BTreeMap<StockId, Arc<Mutex<Stock>>>,
    by_key: HashMap<StockKey, StockId>,
    next_id: u64,
}

/// In-memory stock ledger.
///
/// Rows live behind one mutex each; the table lock is only held long enough
/// to look up or insert a row handle, never while waiting on a row. Every
/// mutation runs through [`StockLedger::batch`], which locks the requested
/// rows in ascending [`StockId`] order, so two callers needing rows A and B
/// always contend in the same order.
#[derive(Debug)]
pub struct StockLedger {
    rows: RwLock<RowTable>,
    movements: Mutex<Vec<StockMovement>>,
    default_threshold: i64,
}

impl Default for StockLedger {
    fn default() -> Self {
        Self::with_default_threshold(DEFAULT_LOW_STOCK_THRESHOLD)
    }
}

/// What a committed batch changed: the rows it touched (after the change)
/// and the movements it appended, both in stock-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub touched: Vec<Stock>,
    pub movements: Vec<StockMovement>,
}

/// Movement log totals compared against a stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub stock_id: StockId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub movement_quantity: i64,
    pub movement_reserved: i64,
    pub movement_count: usize,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.quantity == self.movement_quantity && self.reserved_quantity == self.movement_reserved
    }
}

/// Staged view of a set of locked stock rows.
///
/// Mutations apply to copies; the ledger writes them back (and appends
/// movements) only when the batch closure returns `Ok`.
#[derive(Debug)]
pub struct StockBatch {
    rows: Vec<Stock>,
}

impl StockBatch {
    /// Locked rows in stock-id order.
    pub fn rows(&self) -> &[Stock] {
        &self.rows
    }

    pub fn stock(&self, id: StockId) -> DomainResult<&Stock> {
        self.rows
            .binary_search_by_key(&id, |s| s.id)
            .map(|idx| &self.rows[idx])
            .map_err(|_| DomainError::invariant(format!("{id} is not locked by this batch")))
    }

    /// Locked rows holding `product`, in stock-id order.
    pub fn ids_for_product(&self, product: ProductId) -> Vec<StockId> {
        self.rows
            .iter()
            .filter(|s| s.product == product)
            .map(|s| s.id)
            .collect()
    }

    pub fn receive(&mut self, id: StockId, qty: i64) -> DomainResult<()> {
        self.row_mut(id)?.receive(qty)
    }

    pub fn adjust(&mut self, id: StockId, delta: i64) -> DomainResult<()> {
        self.row_mut(id)?.adjust(delta)
    }

    pub fn reserve(&mut self, id: StockId, qty: i64) -> DomainResult<()> {
        self.row_mut(id)?.reserve(qty)
    }

    pub fn release(&mut self, id: StockId, qty: i64) -> DomainResult<()> {
        self.row_mut(id)?.release(qty)
    }

    pub fn commit_reserved(&mut self, id: StockId, qty: i64) -> DomainResult<()> {
        self.row_mut(id)?.commit_reserved(qty)
    }

    fn row_mut(&mut self, id: StockId) -> DomainResult<&mut Stock> {
        let idx = self
            .rows
            .binary_search_by_key(&id, |s| s.id)
            .map_err(|_| DomainError::invariant(format!("{id} is not locked by this batch")))?;
        Ok(&mut self.rows[idx])
    }
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger whose lazily created rows start with the given threshold.
    pub fn with_default_threshold(threshold: i64) -> Self {
        Self {
            rows: RwLock::new(RowTable::default()),
            movements: Mutex::new(Vec::new()),
            default_threshold: threshold,
        }
    }

    pub fn default_threshold(&self) -> i64 {
        self.default_threshold
    }

    /// Existing row for (product, sales point), or a new empty one. Idempotent.
    pub fn get_or_create(&self, product: ProductId, sales_point: SalesPointId) -> DomainResult<Stock> {
        let handle = self.ensure_row(StockKey {
            product,
            sales_point,
        })?;
        snapshot_of(&handle)
    }

    pub fn get(&self, product: ProductId, sales_point: SalesPointId) -> DomainResult<Option<Stock>> {
        let key = StockKey {
            product,
            sales_point,
        };
        let handle = {
            let table = self.read_table()?;
            table.by_key.get(&key).and_then(|id| table.by_id.get(id)).cloned()
        };
        handle.as_ref().map(snapshot_of).transpose()
    }

    pub fn stock(&self, id: StockId) -> DomainResult<Stock> {
        let handle = self
            .read_table()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("{id}")))?;
        snapshot_of(&handle)
    }

    /// Ids of every row holding `product`, ascending.
    pub fn stock_ids_for_product(&self, product: ProductId) -> DomainResult<Vec<StockId>> {
        let table = self.read_table()?;
        let mut ids: Vec<StockId> = table
            .by_key
            .iter()
            .filter(|(key, _)| key.product == product)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn stocks_for_product(&self, product: ProductId) -> DomainResult<Vec<Stock>> {
        self.snapshot_where(|key| key.product == product)
    }

    /// Sum of available quantity across every sales point.
    pub fn total_available(&self, product: ProductId) -> DomainResult<i64> {
        Ok(self
            .stocks_for_product(product)?
            .iter()
            .map(Stock::available)
            .fold(0, i64::saturating_add))
    }

    /// Every row, in stock-id order.
    pub fn snapshot(&self) -> DomainResult<Vec<Stock>> {
        self.snapshot_where(|_| true)
    }

    pub fn row_count(&self) -> DomainResult<usize> {
        Ok(self.read_table()?.by_id.len())
    }

    pub fn movement_count(&self) -> DomainResult<usize> {
        Ok(self.lock_movements()?.len())
    }

    /// Rows at or below their threshold, optionally limited to one sales point.
    pub fn low_stock(&self, sales_point: Option<SalesPointId>) -> DomainResult<Vec<Stock>> {
        Ok(self
            .snapshot_where(|key| sales_point.is_none_or(|sp| key.sales_point == sp))?
            .into_iter()
            .filter(Stock::is_low_stock)
            .collect())
    }

    /// Rows the actor may see: everything for superusers and admins, the
    /// assigned sales points for store staff, nothing for customers.
    pub fn visible_to(&self, actor: &Actor) -> DomainResult<Vec<Stock>> {
        self.snapshot_where(|key| can_act_on_sales_point(actor, key.sales_point))
    }

    pub fn set_low_stock_threshold(
        &self,
        product: ProductId,
        sales_point: SalesPointId,
        threshold: i64,
    ) -> DomainResult<Stock> {
        if threshold < 0 {
            return Err(DomainError::invalid_quantity(
                threshold,
                "low stock threshold cannot be negative",
            ));
        }
        let handle = self.ensure_row(StockKey {
            product,
            sales_point,
        })?;
        let mut row = lock_row(&handle)?;
        row.low_stock_threshold = threshold;
        Ok(row.clone())
    }

    pub fn receive(
        &self,
        product: ProductId,
        sales_point: SalesPointId,
        qty: i64,
        reason: &str,
    ) -> DomainResult<Stock> {
        if qty <= 0 {
            return Err(DomainError::invalid_quantity(qty, "received quantity must be positive"));
        }
        let id = self.get_or_create(product, sales_point)?.id;
        self.single(id, reason, |b| b.receive(id, qty))
    }

    pub fn adjust(
        &self,
        product: ProductId,
        sales_point: SalesPointId,
        delta: i64,
        reason: &str,
    ) -> DomainResult<Stock> {
        if delta == 0 {
            return Err(DomainError::invalid_quantity(0, "adjustment cannot be zero"));
        }
        let id = self.get_or_create(product, sales_point)?.id;
        self.single(id, reason, |b| b.adjust(id, delta))
    }

    pub fn reserve(&self, product: ProductId, sales_point: SalesPointId, qty: i64) -> DomainResult<Stock> {
        if qty <= 0 {
            return Err(DomainError::invalid_quantity(qty, "reserved quantity must be positive"));
        }
        let id = self.get_or_create(product, sales_point)?.id;
        self.single(id, reason::RESERVATION, |b| b.reserve(id, qty))
    }

    pub fn release_reservation(
        &self,
        product: ProductId,
        sales_point: SalesPointId,
        qty: i64,
    ) -> DomainResult<Stock> {
        let id = self.existing_id(product, sales_point, "release")?;
        self.single(id, reason::RELEASE, |b| b.release(id, qty))
    }

    pub fn commit_reserved(
        &self,
        product: ProductId,
        sales_point: SalesPointId,
        qty: i64,
    ) -> DomainResult<Stock> {
        let id = self.existing_id(product, sales_point, "commit")?;
        self.single(id, reason::COMMIT, |b| b.commit_reserved(id, qty))
    }

    /// Run `f` against the given rows as one atomic unit.
    ///
    /// Rows are locked in ascending id order and stay locked until the
    /// staged changes are written back and one movement per changed row is
    /// appended under `reason`. If `f` fails nothing is written.
    pub fn batch<R>(
        &self,
        stock_ids: &[StockId],
        reason: &str,
        f: impl FnOnce(&mut StockBatch) -> DomainResult<R>,
    ) -> DomainResult<(R, BatchOutcome)> {
        let mut ids = stock_ids.to_vec();
        ids.sort();
        ids.dedup();

        let handles = {
            let table = self.read_table()?;
            ids.iter()
                .map(|id| {
                    table
                        .by_id
                        .get(id)
                        .cloned()
                        .ok_or_else(|| DomainError::not_found(format!("{id}")))
                })
                .collect::<DomainResult<Vec<_>>>()?
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(lock_row(handle)?);
        }

        let mut staged = StockBatch {
            rows: guards.iter().map(|g| (**g).clone()).collect(),
        };
        let value = f(&mut staged)?;

        if let Some(broken) = staged.rows.iter().find(|s| !s.holds_invariant()) {
            return Err(DomainError::invariant(format!(
                "{} would end with quantity {} and reserved {}",
                broken.id, broken.quantity, broken.reserved_quantity
            )));
        }

        let mut log = self.lock_movements()?;
        let mut outcome = BatchOutcome::default();
        let now = Utc::now();

        for (guard, row) in guards.iter_mut().zip(staged.rows) {
            let change = row.quantity - guard.quantity;
            let reserved_change = row.reserved_quantity - guard.reserved_quantity;
            if change == 0 && reserved_change == 0 {
                continue;
            }

            let movement = StockMovement {
                id: MovementId(log.len() as u64 + 1),
                stock_id: row.id,
                product: row.product,
                sales_point: row.sales_point,
                change,
                reserved_change,
                reason: reason.to_string(),
                created_at: now,
            };

            tracing::debug!(
                stock_id = row.id.0,
                product_id = %row.product,
                sales_point_id = %row.sales_point,
                change,
                reserved_change,
                quantity = row.quantity,
                reserved_quantity = row.reserved_quantity,
                reason,
                "stock movement recorded"
            );

            **guard = row.clone();
            log.push(movement.clone());
            outcome.movements.push(movement);
            outcome.touched.push(row);
        }

        Ok((value, outcome))
    }

    /// Movements of one row in insertion order.
    pub fn movements(&self, product: ProductId, sales_point: SalesPointId) -> DomainResult<Vec<StockMovement>> {
        Ok(self
            .lock_movements()?
            .iter()
            .filter(|m| m.product == product && m.sales_point == sales_point)
            .cloned()
            .collect())
    }

    pub fn all_movements(&self) -> DomainResult<Vec<StockMovement>> {
        Ok(self.lock_movements()?.clone())
    }

    /// Compare a row with the totals of its movement log.
    pub fn reconcile(&self, product: ProductId, sales_point: SalesPointId) -> DomainResult<Reconciliation> {
        let id = self.existing_id(product, sales_point, "reconcile")?;
        let handle = self
            .read_table()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("{id}")))?;

        // Row before log, the same order batches take them.
        let row = lock_row(&handle)?;
        let log = self.lock_movements()?;

        let mut report = Reconciliation {
            stock_id: id,
            quantity: row.quantity,
            reserved_quantity: row.reserved_quantity,
            movement_quantity: 0,
            movement_reserved: 0,
            movement_count: 0,
        };
        for m in log.iter().filter(|m| m.stock_id == id) {
            report.movement_quantity += m.change;
            report.movement_reserved += m.reserved_change;
            report.movement_count += 1;
        }
        Ok(report)
    }

    fn single(
        &self,
        id: StockId,
        reason: &str,
        f: impl FnOnce(&mut StockBatch) -> DomainResult<()>,
    ) -> DomainResult<Stock> {
        let (row, _) = self.batch(&[id], reason, |b| {
            f(b)?;
            b.stock(id).cloned()
        })?;
        Ok(row)
    }

    fn existing_id(&self, product: ProductId, sales_point: SalesPointId, op: &str) -> DomainResult<StockId> {
        self.read_table()?
            .by_key
            .get(&StockKey {
                product,
                sales_point,
            })
            .copied()
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "cannot {op}: no stock row for product {product} at sales point {sales_point}"
                ))
            })
    }

    fn ensure_row(&self, key: StockKey) -> DomainResult<Arc<Mutex<Stock>>> {
        {
            let table = self.read_table()?;
            if let Some(handle) = table.by_key.get(&key).and_then(|id| table.by_id.get(id)) {
                return Ok(handle.clone());
            }
        }

        let mut table = self
            .rows
            .write()
            .map_err(|_| DomainError::invariant("stock table lock poisoned"))?;
        // Another writer may have created it between the two locks.
        if let Some(handle) = table.by_key.get(&key).and_then(|id| table.by_id.get(id)) {
            return Ok(handle.clone());
        }

        table.next_id += 1;
        let id = StockId(table.next_id);
        let handle = Arc::new(Mutex::new(Stock::new(id, key, self.default_threshold)));
        table.by_id.insert(id, handle.clone());
        table.by_key.insert(key, id);

        tracing::debug!(
            stock_id = id.0,
            product_id = %key.product,
            sales_point_id = %key.sales_point,
            "stock row created"
        );
        Ok(handle)
    }

    fn snapshot_where(&self, keep: impl Fn(&StockKey) -> bool) -> DomainResult<Vec<Stock>> {
        let handles: Vec<Arc<Mutex<Stock>>> = {
            let table = self.read_table()?;
            let mut ids: Vec<StockId> = table
                .by_key
                .iter()
                .filter(|(key, _)| keep(*key))
                .map(|(_, id)| *id)
                .collect();
            ids.sort();
            ids.iter().filter_map(|id| table.by_id.get(id).cloned()).collect()
        };
        handles.iter().map(snapshot_of).collect()
    }

    fn read_table(&self) -> DomainResult<std::sync::RwLockReadGuard<'_, RowTable>> {
        self.rows
            .read()
            .map_err(|_| DomainError::invariant("stock table lock poisoned"))
    }

    fn lock_movements(&self) -> DomainResult<MutexGuard<'_, Vec<StockMovement>>> {
        self.movements
            .lock()
            .map_err(|_| DomainError::invariant("movement log lock poisoned"))
    }
}

fn lock_row(handle: &Arc<Mutex<Stock>>) -> DomainResult<MutexGuard<'_, Stock>> {
    handle
        .lock()
        .map_err(|_| DomainError::invariant("stock row lock poisoned"))
}

fn snapshot_of(handle: &Arc<Mutex<Stock>>) -> DomainResult<Stock> {
    Ok(lock_row(handle)?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use stockroom_auth::Role;
    use stockroom_core::UserId;

    fn ids() -> (ProductId, SalesPointId) {
        (ProductId::new(), SalesPointId::new())
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();

        let first = ledger.get_or_create(p, sp).unwrap();
        let second = ledger.get_or_create(p, sp).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!((second.quantity, second.reserved_quantity), (0, 0));
        assert_eq!(ledger.row_count().unwrap(), 1);
    }

    #[test]
    fn new_rows_take_the_configured_threshold() {
        let ledger = StockLedger::with_default_threshold(12);
        let (p, sp) = ids();
        assert_eq!(ledger.get_or_create(p, sp).unwrap().low_stock_threshold, 12);
    }

    #[test]
    fn each_mutation_appends_one_movement() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();

        ledger.receive(p, sp, 20, "opening balance").unwrap();
        ledger.reserve(p, sp, 3).unwrap();
        ledger.release_reservation(p, sp, 1).unwrap();
        let stock = ledger.commit_reserved(p, sp, 2).unwrap();

        assert_eq!((stock.quantity, stock.reserved_quantity), (18, 0));
        let shapes: Vec<(i64, i64, String)> = ledger
            .movements(p, sp)
            .unwrap()
            .into_iter()
            .map(|m| (m.change, m.reserved_change, m.reason))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (20, 0, "opening balance".to_string()),
                (0, 3, reason::RESERVATION.to_string()),
                (0, -1, reason::RELEASE.to_string()),
                (-2, -2, reason::COMMIT.to_string()),
            ]
        );
        assert!(ledger.reconcile(p, sp).unwrap().is_balanced());
    }

    #[test]
    fn rejected_mutations_leave_no_trace() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        ledger.receive(p, sp, 4, "receipt").unwrap();

        assert!(ledger.reserve(p, sp, 5).unwrap_err().is_insufficient_stock());
        assert!(ledger.adjust(p, sp, -5, "shrinkage").unwrap_err().is_insufficient_stock());
        assert!(matches!(
            ledger.receive(p, sp, 0, "receipt"),
            Err(DomainError::InvalidQuantity { .. })
        ));

        assert_eq!(ledger.movements(p, sp).unwrap().len(), 1);
        assert_eq!(ledger.get(p, sp).unwrap().unwrap().quantity, 4);
    }

    #[test]
    fn overflowing_receipt_is_rejected_and_the_row_stays_usable() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        ledger.receive(p, sp, i64::MAX, "opening balance").unwrap();

        assert!(matches!(
            ledger.receive(p, sp, 1, "receipt"),
            Err(DomainError::InvalidQuantity { quantity: 1, .. })
        ));

        let stock = ledger.get(p, sp).unwrap().unwrap();
        assert_eq!(stock.quantity, i64::MAX);
        assert_eq!(ledger.movements(p, sp).unwrap().len(), 1);
        ledger.adjust(p, sp, -1, "shrinkage").unwrap();
        assert!(ledger.reconcile(p, sp).unwrap().is_balanced());
    }

    #[test]
    fn release_and_commit_need_an_existing_row() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        assert!(matches!(
            ledger.release_reservation(p, sp, 1),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(matches!(
            ledger.commit_reserved(p, sp, 1),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(ledger.row_count().unwrap(), 0);
    }

    #[test]
    fn failed_batch_rolls_back_every_row() {
        let ledger = StockLedger::new();
        let p = ProductId::new();
        let (a, b) = (SalesPointId::new(), SalesPointId::new());
        let row_a = ledger.receive(p, a, 5, "receipt").unwrap().id;
        let row_b = ledger.receive(p, b, 1, "receipt").unwrap().id;

        let err = ledger
            .batch(&[row_b, row_a], "order", |batch| {
                batch.reserve(row_a, 5)?;
                batch.reserve(row_b, 2)
            })
            .unwrap_err();

        assert!(err.is_insufficient_stock());
        assert_eq!(ledger.stock(row_a).unwrap().reserved_quantity, 0);
        assert_eq!(ledger.movement_count().unwrap(), 2);
    }

    #[test]
    fn batch_appends_one_movement_per_row_with_net_deltas() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        let id = ledger.receive(p, sp, 10, "receipt").unwrap().id;

        let ((), outcome) = ledger
            .batch(&[id, id], "order", |batch| {
                batch.reserve(id, 2)?;
                batch.reserve(id, 3)
            })
            .unwrap();

        assert_eq!(outcome.movements.len(), 1);
        assert_eq!(outcome.movements[0].reserved_change, 5);
        assert_eq!(outcome.touched[0].reserved_quantity, 5);
    }

    #[test]
    fn batch_skips_rows_whose_changes_cancel_out() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        let id = ledger.receive(p, sp, 10, "receipt").unwrap().id;

        let ((), outcome) = ledger
            .batch(&[id], "noop", |batch| {
                batch.reserve(id, 2)?;
                batch.release(id, 2)
            })
            .unwrap();

        assert!(outcome.movements.is_empty());
        assert_eq!(ledger.movement_count().unwrap(), 1);
    }

    #[test]
    fn batch_refuses_rows_it_did_not_lock() {
        let ledger = StockLedger::new();
        let p = ProductId::new();
        let locked = ledger.receive(p, SalesPointId::new(), 1, "receipt").unwrap().id;
        let other = ledger.receive(p, SalesPointId::new(), 1, "receipt").unwrap().id;

        let err = ledger
            .batch(&[locked], "sneaky", |batch| batch.reserve(other, 1))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn queries_are_sorted_and_scoped() {
        let ledger = StockLedger::new();
        let p = ProductId::new();
        let (north, south) = (SalesPointId::new(), SalesPointId::new());
        ledger.receive(p, north, 3, "receipt").unwrap();
        ledger.receive(p, south, 30, "receipt").unwrap();
        ledger.reserve(p, south, 10).unwrap();

        let rows = ledger.stocks_for_product(p).unwrap();
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(ledger.total_available(p).unwrap(), 23);

        let low: Vec<SalesPointId> = ledger
            .low_stock(None)
            .unwrap()
            .into_iter()
            .map(|s| s.sales_point)
            .collect();
        assert_eq!(low, vec![north]);
        assert!(ledger.low_stock(Some(south)).unwrap().is_empty());

        let seller = Actor::new(UserId::new(), "s@example.com", Role::Seller).with_sales_point(south);
        let visible = ledger.visible_to(&seller).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].sales_point, south);

        let admin = Actor::new(UserId::new(), "a@example.com", Role::Admin);
        assert_eq!(ledger.visible_to(&admin).unwrap().len(), 2);
        assert!(ledger.visible_to(&Actor::customer("c@example.com")).unwrap().is_empty());
    }

    #[test]
    fn threshold_changes_do_not_move_stock() {
        let ledger = StockLedger::new();
        let (p, sp) = ids();
        ledger.receive(p, sp, 8, "receipt").unwrap();

        let row = ledger.set_low_stock_threshold(p, sp, 10).unwrap();
        assert!(row.is_low_stock());
        assert_eq!(ledger.movement_count().unwrap(), 1);
        assert!(ledger.set_low_stock_threshold(p, sp, -1).is_err());
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let ledger = Arc::new(StockLedger::new());
        let (p, sp) = ids();
        ledger.receive(p, sp, 50, "receipt").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || (0..10).filter(|_| ledger.reserve(p, sp, 1).is_ok()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let stock = ledger.get(p, sp).unwrap().unwrap();
        assert_eq!(granted, 50);
        assert_eq!(stock.reserved_quantity, 50);
        assert!(ledger.reconcile(p, sp).unwrap().is_balanced());
    }

    #[test]
    fn crossing_batches_do_not_deadlock() {
        let ledger = Arc::new(StockLedger::new());
        let p = ProductId::new();
        let a = ledger.receive(p, SalesPointId::new(), 1_000, "receipt").unwrap().id;
        let b = ledger.receive(p, SalesPointId::new(), 1_000, "receipt").unwrap().id;

        let spawn = |order: [StockId; 2]| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for _ in 0..200 {
                    ledger
                        .batch(&order, "swap", |batch| {
                            batch.reserve(order[0], 1)?;
                            batch.reserve(order[1], 1)
                        })
                        .unwrap();
                }
            })
        };
        let t1 = spawn([a, b]);
        let t2 = spawn([b, a]);
        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(ledger.stock(a).unwrap().reserved_quantity, 400);
        assert_eq!(ledger.stock(b).unwrap().reserved_quantity, 400);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Adjust(i64),
        Reserve(i64),
        Release(i64),
        Commit(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..40).prop_map(Op::Receive),
            (-20i64..20).prop_map(Op::Adjust),
            (1i64..20).prop_map(Op::Reserve),
            (1i64..20).prop_map(Op::Release),
            (1i64..20).prop_map(Op::Commit),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the movement log always explains the row exactly.
        #[test]
        fn movement_log_reconciles_with_row(
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let ledger = StockLedger::new();
            let (p, sp) = ids();
            ledger.get_or_create(p, sp).unwrap();

            for op in ops {
                let _ = match op {
                    Op::Receive(q) => ledger.receive(p, sp, q, "receipt"),
                    Op::Adjust(d) => ledger.adjust(p, sp, d, "count"),
                    Op::Reserve(q) => ledger.reserve(p, sp, q),
                    Op::Release(q) => ledger.release_reservation(p, sp, q),
                    Op::Commit(q) => ledger.commit_reserved(p, sp, q),
                };
                let stock = ledger.get(p, sp).unwrap().unwrap();
                prop_assert!(stock.holds_invariant());
            }

            let report = ledger.reconcile(p, sp).unwrap();
            prop_assert!(report.is_balanced());
        }
    }
}
