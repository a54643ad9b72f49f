use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockroom_core::DomainError;

/// Role of a user in the back office.
///
/// Superusers and admins act across every sales point. Store admins and
/// sellers are scoped to the sales points they are assigned to. Customers
/// only ever act on their own orders.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superuser,
    Admin,
    StoreAdmin,
    Seller,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superuser => "superuser",
            Role::Admin => "admin",
            Role::StoreAdmin => "store_admin",
            Role::Seller => "seller",
            Role::Customer => "customer",
        }
    }

    /// Back-office staff (anyone but a customer).
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Customer)
    }

    /// Not restricted to assigned sales points.
    pub fn is_global(&self) -> bool {
        matches!(self, Role::Superuser | Role::Admin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superuser" => Ok(Role::Superuser),
            "admin" => Ok(Role::Admin),
            "store_admin" => Ok(Role::StoreAdmin),
            "seller" => Ok(Role::Seller),
            "customer" => Ok(Role::Customer),
            other => Err(DomainError::validation(format!("unknown role '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_display_name() {
        for role in [
            Role::Superuser,
            Role::Admin,
            Role::StoreAdmin,
            Role::Seller,
            Role::Customer,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn only_customers_are_not_staff() {
        assert!(Role::Seller.is_staff());
        assert!(!Role::Customer.is_staff());
        assert!(!Role::StoreAdmin.is_global());
        assert!(Role::Admin.is_global());
    }
}
