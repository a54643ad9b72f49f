//! Supplier purchase invoices.
//!
//! Processing an invoice receives its lines into stock at the invoice's
//! sales point; reverting it or recording a supplier return takes stock
//! back out through the same ledger the order side uses.

pub mod invoice;
pub mod lifecycle;
pub mod store;

pub use invoice::{
    CreateInvoice, Invoice, InvoiceCommand, InvoiceCreated, InvoiceEvent, InvoiceItem, InvoiceReturn,
    InvoiceStatus, StockLine,
};
pub use lifecycle::{
    DEFAULT_INVOICE_PREFIX, INVOICE_AGGREGATE_TYPE, InvoiceEventBus, InvoiceLifecycle, InvoiceOutcome,
    NewInvoice, ReturnRequest, SalesHistory,
};
pub use store::InvoiceStore;
