use serde::{Deserialize, Serialize};

use stockroom_core::{SalesPointId, UserId};

use crate::Role;

/// The already-authenticated caller of a core operation.
///
/// Built by outer layers from whatever identity source they use. `sales_points`
/// lists the locations a store admin or seller is assigned to; the first one
/// is their home sales point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub sales_points: Vec<SalesPointId>,
}

impl Actor {
    pub fn new(user_id: UserId, email: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            email: email.into(),
            role,
            sales_points: Vec::new(),
        }
    }

    pub fn customer(email: impl Into<String>) -> Self {
        Self::new(UserId::new(), email, Role::Customer)
    }

    pub fn with_sales_point(mut self, sales_point: SalesPointId) -> Self {
        if !self.sales_points.contains(&sales_point) {
            self.sales_points.push(sales_point);
        }
        self
    }

    /// Home sales point used to prioritise stock rows (store staff only).
    pub fn home_sales_point(&self) -> Option<SalesPointId> {
        match self.role {
            Role::StoreAdmin | Role::Seller => self.sales_points.first().copied(),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}
