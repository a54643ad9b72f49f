//! `stockroom-auth`: caller facts and capability checks.
//!
//! Authentication happens outside the core. Outer layers hand in an [`Actor`]
//! (who is calling, in which role, assigned to which sales points) and the
//! core queries [`authorize`] once per operation.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize, authorize_at, can_act_on_sales_point};
pub use permissions::Capability;
pub use principal::Actor;
pub use roles::Role;
