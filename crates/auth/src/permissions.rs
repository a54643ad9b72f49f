use serde::{Deserialize, Serialize};

use crate::Role;

/// Something an actor may be allowed to do.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create an order from a cart.
    PlaceOrder,
    /// Move any order through its status machine.
    ManageOrders,
    /// Create, process and revert supplier invoices.
    ManageInvoices,
    /// Record and delete supplier returns.
    ManageReturns,
    /// Manual stock adjustments and threshold changes.
    AdjustStock,
    /// Read stock rows and movements.
    ViewStock,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PlaceOrder => "orders.place",
            Capability::ManageOrders => "orders.manage",
            Capability::ManageInvoices => "invoices.manage",
            Capability::ManageReturns => "invoices.returns",
            Capability::AdjustStock => "stock.adjust",
            Capability::ViewStock => "stock.view",
        }
    }

    /// Capabilities granted to a role.
    pub fn granted_to(role: Role) -> &'static [Capability] {
        use Capability::*;
        match role {
            Role::Superuser | Role::Admin => &[
                PlaceOrder,
                ManageOrders,
                ManageInvoices,
                ManageReturns,
                AdjustStock,
                ViewStock,
            ],
            Role::StoreAdmin => &[
                PlaceOrder,
                ManageOrders,
                ManageInvoices,
                ManageReturns,
                AdjustStock,
                ViewStock,
            ],
            Role::Seller => &[PlaceOrder, ManageOrders, ViewStock],
            Role::Customer => &[PlaceOrder],
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
