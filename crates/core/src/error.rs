//! Domain error model.

use thiserror::Error;

use crate::id::{ProductId, SalesPointId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Every stock-related variant names the offending
/// product, sales point and quantity so callers can build a user-facing message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, empty cart).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A quantity that must be positive was zero or negative.
    #[error("invalid quantity {quantity}: {context}")]
    InvalidQuantity { quantity: i64, context: String },

    /// The operation would push available stock below zero.
    ///
    /// `sales_point` is `None` when the check was made across all sales points.
    #[error(
        "insufficient stock for product {product}{}: requested {requested}, available {available}",
        fmt_sales_point(.sales_point)
    )]
    InsufficientStock {
        product: ProductId,
        sales_point: Option<SalesPointId>,
        requested: i64,
        available: i64,
    },

    /// A status change that is not in the allowed transition table.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Reserved quantity does not cover what an order needs to ship.
    #[error("cannot fulfill product {product}: required {required}, reserved {reserved}")]
    Fulfillment {
        product: ProductId,
        required: i64,
        reserved: i64,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. duplicate invoice number).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller lacks the capability or scope for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

fn fmt_sales_point(sales_point: &Option<SalesPointId>) -> String {
    match sales_point {
        Some(sp) => format!(" at sales point {sp}"),
        None => String::new(),
    }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_quantity(quantity: i64, context: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            quantity,
            context: context.into(),
        }
    }

    pub fn insufficient_stock(
        product: ProductId,
        sales_point: Option<SalesPointId>,
        requested: i64,
        available: i64,
    ) -> Self {
        Self::InsufficientStock {
            product,
            sales_point,
            requested,
            available,
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl core::fmt::Display,
        to: impl core::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Whether the error was caused by a stock shortfall.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }
}
