use serde::{Deserialize, Serialize};

use stockroom_core::{ProductId, SalesPointId};

use crate::{Stock, StockId};

/// A stock row sitting at or below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub stock_id: StockId,
    pub product: ProductId,
    pub sales_point: SalesPointId,
    pub quantity: i64,
    pub threshold: i64,
}

/// Check a row right after a ledger mutation.
///
/// Uses `quantity <= low_stock_threshold`. Emits a warning and returns the
/// alert so the caller can surface it.
pub fn check_low_stock(stock: &Stock) -> Option<LowStockAlert> {
    if !stock.is_low_stock() {
        return None;
    }

    tracing::warn!(
        stock_id = stock.id.0,
        product_id = %stock.product,
        sales_point_id = %stock.sales_point,
        quantity = stock.quantity,
        threshold = stock.low_stock_threshold,
        "low stock"
    );

    Some(LowStockAlert {
        stock_id: stock.id,
        product: stock.product,
        sales_point: stock.sales_point,
        quantity: stock.quantity,
        threshold: stock.low_stock_threshold,
    })
}
