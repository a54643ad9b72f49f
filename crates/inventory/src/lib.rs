//! Inventory domain module: multi-location stock and its movement ledger.
//!
//! [`StockLedger`] is the single source of truth for on-hand and reserved
//! quantities per (product, sales point). Every mutation goes through a
//! [`StockBatch`] that locks the touched rows in stock-id order, validates
//! against staged copies, and commits all rows plus their movements together.

pub mod ledger;
pub mod low_stock;
pub mod movement;
pub mod sales_point;
pub mod stock;

pub use ledger::{BatchOutcome, Reconciliation, StockBatch, StockLedger};
pub use low_stock::{LowStockAlert, check_low_stock};
pub use movement::{MovementId, StockMovement};
pub use sales_point::{SalesPoint, SalesPointDirectory};
pub use stock::{DEFAULT_LOW_STOCK_THRESHOLD, Stock, StockId, StockKey};
