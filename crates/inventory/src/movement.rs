use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{ProductId, SalesPointId};

use crate::StockId;

/// Position of a movement in the ledger's append-only log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub u64);

/// Append-only audit record of one committed change to one stock row.
///
/// `change` is the signed on-hand delta and `reserved_change` the signed
/// reserved delta: a receipt is `(+q, 0)`, a reservation `(0, +q)`, a
/// release `(0, -q)` and a commit `(-q, -q)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub stock_id: StockId,
    pub product: ProductId,
    pub sales_point: SalesPointId,
    pub change: i64,
    pub reserved_change: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Net change to the available quantity.
    pub fn available_change(&self) -> i64 {
        self.change - self.reserved_change
    }
}

/// Reasons recorded by the single-row ledger operations.
pub mod reason {
    pub const RESERVATION: &str = "reservation";
    pub const RELEASE: &str = "reservation released";
    pub const COMMIT: &str = "reservation committed";
    pub const ADJUSTMENT: &str = "manual adjustment";
}
