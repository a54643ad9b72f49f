use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ProductId, SalesPointId};

/// Threshold given to stock rows when nothing else is configured.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

/// Stock row identifier.
///
/// Sequential per ledger; multi-row operations lock rows in ascending id order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockId(pub u64);

impl core::fmt::Display for StockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "stock#{}", self.0)
    }
}

/// Natural key of a stock row. Unique per ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product: ProductId,
    pub sales_point: SalesPointId,
}

/// Quantity record for one product at one sales point.
///
/// Invariant: `quantity >= 0`, `reserved_quantity >= 0` and
/// `quantity - reserved_quantity >= 0` after every operation. Each mutating
/// method checks its precondition first and leaves the row untouched on error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub product: ProductId,
    pub sales_point: SalesPointId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub low_stock_threshold: i64,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    pub fn new(id: StockId, key: StockKey, low_stock_threshold: i64) -> Self {
        Self {
            id,
            product: key.product,
            sales_point: key.sales_point,
            quantity: 0,
            reserved_quantity: 0,
            low_stock_threshold,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            product: self.product,
            sales_point: self.sales_point,
        }
    }

    /// What can still be promised to a new order.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }

    pub fn holds_invariant(&self) -> bool {
        self.quantity >= 0 && self.reserved_quantity >= 0 && self.available() >= 0
    }

    /// Inbound goods: increases on-hand quantity.
    pub fn receive(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty, "received quantity must be positive")?;
        self.quantity = self.quantity.checked_add(qty).ok_or_else(|| {
            DomainError::invalid_quantity(qty, "received quantity overflows on-hand stock")
        })?;
        self.touch();
        Ok(())
    }

    /// Manual signed correction of on-hand quantity.
    ///
    /// A negative delta may only consume available stock; reserved units stay
    /// carved out.
    pub fn adjust(&mut self, delta: i64) -> DomainResult<()> {
        if delta == 0 {
            return Err(DomainError::invalid_quantity(0, "adjustment cannot be zero"));
        }
        if delta < 0 && self.available() + delta < 0 {
            return Err(self.shortfall(delta.saturating_neg()));
        }
        self.quantity = self.quantity.checked_add(delta).ok_or_else(|| {
            DomainError::invalid_quantity(delta, "adjustment overflows on-hand stock")
        })?;
        self.touch();
        Ok(())
    }

    /// Carve `qty` out of available stock for an order.
    pub fn reserve(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty, "reserved quantity must be positive")?;
        if self.available() < qty {
            return Err(self.shortfall(qty));
        }
        self.reserved_quantity = self.reserved_quantity.checked_add(qty).ok_or_else(|| {
            DomainError::invalid_quantity(qty, "reservation overflows reserved stock")
        })?;
        self.touch();
        Ok(())
    }

    /// Give reserved units back to available stock.
    pub fn release(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty, "released quantity must be positive")?;
        if self.reserved_quantity < qty {
            return Err(DomainError::invariant(format!(
                "cannot release {qty} units of product {} at sales point {}: only {} reserved",
                self.product, self.sales_point, self.reserved_quantity
            )));
        }
        self.reserved_quantity -= qty;
        self.touch();
        Ok(())
    }

    /// Turn reserved units into an on-hand deduction (goods left the store).
    pub fn commit_reserved(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty, "committed quantity must be positive")?;
        if self.reserved_quantity < qty {
            return Err(DomainError::invariant(format!(
                "cannot commit {qty} units of product {} at sales point {}: only {} reserved",
                self.product, self.sales_point, self.reserved_quantity
            )));
        }
        self.quantity -= qty;
        self.reserved_quantity -= qty;
        self.touch();
        Ok(())
    }

    fn shortfall(&self, requested: i64) -> DomainError {
        DomainError::insufficient_stock(
            self.product,
            Some(self.sales_point),
            requested,
            self.available(),
        )
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn ensure_positive(qty: i64, context: &str) -> DomainResult<()> {
    if qty <= 0 {
        return Err(DomainError::invalid_quantity(qty, context));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stock_with(quantity: i64, reserved: i64) -> Stock {
        let mut stock = Stock::new(
            StockId(1),
            StockKey {
                product: ProductId::new(),
                sales_point: SalesPointId::new(),
            },
            DEFAULT_LOW_STOCK_THRESHOLD,
        );
        stock.quantity = quantity;
        stock.reserved_quantity = reserved;
        stock
    }

    #[test]
    fn receive_rejects_non_positive_quantities() {
        let mut stock = stock_with(0, 0);
        for qty in [0, -3] {
            let err = stock.receive(qty).unwrap_err();
            assert!(matches!(err, DomainError::InvalidQuantity { quantity, .. } if quantity == qty));
        }
        assert_eq!(stock.quantity, 0);
    }

    #[test]
    fn reserving_exactly_the_available_amount_succeeds() {
        let mut stock = stock_with(10, 4);
        stock.reserve(6).unwrap();
        assert_eq!(stock.available(), 0);
    }

    #[test]
    fn reserving_one_more_than_available_fails() {
        let mut stock = stock_with(10, 4);
        let err = stock.reserve(7).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product: stock.product,
                sales_point: Some(stock.sales_point),
                requested: 7,
                available: 6,
            }
        );
        assert_eq!(stock.reserved_quantity, 4);
    }

    #[test]
    fn adjust_cannot_eat_into_reserved_units() {
        let mut stock = stock_with(10, 8);
        assert!(stock.adjust(-3).unwrap_err().is_insufficient_stock());
        stock.adjust(-2).unwrap();
        assert_eq!((stock.quantity, stock.reserved_quantity), (8, 8));
    }

    #[test]
    fn release_more_than_reserved_is_an_invariant_violation() {
        let mut stock = stock_with(10, 2);
        let err = stock.release(3).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(stock.reserved_quantity, 2);
    }

    #[test]
    fn commit_reduces_both_counters() {
        let mut stock = stock_with(20, 3);
        stock.commit_reserved(3).unwrap();
        assert_eq!((stock.quantity, stock.reserved_quantity), (17, 0));
    }

    #[test]
    fn receiving_past_i64_max_is_rejected_without_touching_the_row() {
        let mut stock = stock_with(i64::MAX, 0);
        let err = stock.receive(1).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity { quantity: 1, .. }));
        assert_eq!(stock.quantity, i64::MAX);
    }

    #[test]
    fn extreme_adjustments_are_rejected() {
        let mut stock = stock_with(i64::MAX - 1, 0);
        let err = stock.adjust(2).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity { quantity: 2, .. }));

        let err = stock.adjust(i64::MIN).unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(stock.quantity, i64::MAX - 1);
    }

    #[test]
    fn low_stock_flags_the_threshold_itself() {
        let stock = stock_with(DEFAULT_LOW_STOCK_THRESHOLD, 0);
        assert!(stock.is_low_stock());
        let stock = stock_with(DEFAULT_LOW_STOCK_THRESHOLD + 1, 0);
        assert!(!stock.is_low_stock());
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
            (-5i64..50).prop_map(Op::Receive),
            (-30i64..30).prop_map(Op::Adjust),
            (-5i64..30).prop_map(Op::Reserve),
            (-5i64..30).prop_map(Op::Release),
            (-5i64..30).prop_map(Op::Commit),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of operations, successful or rejected,
        /// leaves the row with negative on-hand, reserved or available stock.
        #[test]
        fn random_operations_never_break_the_invariant(
            ops in prop::collection::vec(op_strategy(), 1..60)
        ) {
            let mut stock = stock_with(0, 0);
            for op in ops {
                let before = stock.clone();
                let result = match op {
                    Op::Receive(q) => stock.receive(q),
                    Op::Adjust(d) => stock.adjust(d),
                    Op::Reserve(q) => stock.reserve(q),
                    Op::Release(q) => stock.release(q),
                    Op::Commit(q) => stock.commit_reserved(q),
                };
                prop_assert!(stock.holds_invariant());
                if result.is_err() {
                    prop_assert_eq!(stock.quantity, before.quantity);
                    prop_assert_eq!(stock.reserved_quantity, before.reserved_quantity);
                }
            }
        }

        /// Property: reserve followed by release of the same quantity
        /// restores the reserved counter.
        #[test]
        fn reserve_then_release_round_trips(
            quantity in 1i64..1_000,
            already_reserved in 0i64..500,
            qty in 1i64..1_000,
        ) {
            let reserved = already_reserved.min(quantity);
            let mut stock = stock_with(quantity, reserved);
            prop_assume!(stock.available() >= qty);

            stock.reserve(qty).unwrap();
            stock.release(qty).unwrap();

            prop_assert_eq!(stock.reserved_quantity, reserved);
            prop_assert_eq!(stock.quantity, quantity);
        }

        /// Property: reserve then commit of q moves both counters down by q.
        #[test]
        fn reserve_then_commit_deducts_on_hand(
            quantity in 1i64..1_000,
            qty in 1i64..1_000,
        ) {
            prop_assume!(qty <= quantity);
            let mut stock = stock_with(quantity, 0);

            stock.reserve(qty).unwrap();
            stock.commit_reserved(qty).unwrap();

            prop_assert_eq!(stock.quantity, quantity - qty);
            prop_assert_eq!(stock.reserved_quantity, 0);
        }
    }
}
