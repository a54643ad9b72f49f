use thiserror::Error;

use stockroom_core::{DomainError, SalesPointId};

use crate::{Actor, Capability};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{role}' lacks capability '{capability}'")]
    MissingCapability {
        role: &'static str,
        capability: &'static str,
    },

    #[error("forbidden: not assigned to sales point {0}")]
    OutOfScope(SalesPointId),
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::forbidden(value.to_string())
    }
}

/// Check that the actor's role grants a capability.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(actor: &Actor, capability: Capability) -> Result<(), AuthzError> {
    if Capability::granted_to(actor.role).contains(&capability) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %actor.user_id,
            role = actor.role.as_str(),
            capability = capability.as_str(),
            "capability denied"
        );
        Err(AuthzError::MissingCapability {
            role: actor.role.as_str(),
            capability: capability.as_str(),
        })
    }
}

/// Whether the actor may act on stock at a given sales point.
///
/// Superusers and admins act everywhere; store staff only where assigned;
/// customers never act on stock directly.
pub fn can_act_on_sales_point(actor: &Actor, sales_point: SalesPointId) -> bool {
    if actor.role.is_global() {
        return true;
    }
    actor.is_staff() && actor.sales_points.contains(&sales_point)
}

/// [`authorize`] plus the sales-point scope check.
pub fn authorize_at(
    actor: &Actor,
    capability: Capability,
    sales_point: SalesPointId,
) -> Result<(), AuthzError> {
    authorize(actor, capability)?;
    if can_act_on_sales_point(actor, sales_point) {
        Ok(())
    } else {
        Err(AuthzError::OutOfScope(sales_point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use stockroom_core::UserId;

    fn actor(role: Role) -> Actor {
        Actor::new(UserId::new(), "someone@example.com", role)
    }

    #[test]
    fn customers_can_only_place_orders() {
        let customer = actor(Role::Customer);
        assert!(authorize(&customer, Capability::PlaceOrder).is_ok());
        assert_eq!(
            authorize(&customer, Capability::ManageOrders).unwrap_err(),
            AuthzError::MissingCapability {
                role: "customer",
                capability: "orders.manage",
            }
        );
    }

    #[test]
    fn sellers_cannot_process_invoices() {
        let seller = actor(Role::Seller);
        assert!(authorize(&seller, Capability::ManageInvoices).is_err());
        assert!(authorize(&seller, Capability::ViewStock).is_ok());
    }

    #[test]
    fn store_staff_are_scoped_to_assigned_sales_points() {
        let home = SalesPointId::new();
        let other = SalesPointId::new();
        let store_admin = actor(Role::StoreAdmin).with_sales_point(home);

        assert!(authorize_at(&store_admin, Capability::AdjustStock, home).is_ok());
        assert_eq!(
            authorize_at(&store_admin, Capability::AdjustStock, other).unwrap_err(),
            AuthzError::OutOfScope(other)
        );
    }

    #[test]
    fn admins_act_on_every_sales_point() {
        let admin = actor(Role::Admin);
        assert!(can_act_on_sales_point(&admin, SalesPointId::new()));
        assert!(admin.home_sales_point().is_none());
    }

    #[test]
    fn customers_never_act_on_stock() {
        let sp = SalesPointId::new();
        let customer = actor(Role::Customer).with_sales_point(sp);
        assert!(!can_act_on_sales_point(&customer, sp));
    }

    #[test]
    fn authz_errors_become_forbidden_domain_errors() {
        let err: DomainError = AuthzError::OutOfScope(SalesPointId::new()).into();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }
}
