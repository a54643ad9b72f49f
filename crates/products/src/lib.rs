//! Catalog collaborator.
//!
//! The catalog owns products; the core only reads `price` and `cost_price`
//! when an order is created and snapshots them into the order lines.

pub mod catalog;
pub mod product;

pub use catalog::{Catalog, InMemoryCatalog};
pub use product::Product;
