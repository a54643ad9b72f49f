use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_auth::{Actor, Capability, authorize_at};
use stockroom_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, InvoiceId, ProductId, ReturnId, SalesPointId,
};
use stockroom_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockroom_inventory::{LowStockAlert, StockId, StockLedger, StockMovement, check_low_stock};

use crate::invoice::{
    CreateInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceItem, InvoiceReturn, InvoiceStatus,
};
use crate::store::InvoiceStore;

/// Aggregate type tag on published invoice envelopes.
pub const INVOICE_AGGREGATE_TYPE: &str = "purchasing.invoice";

pub const DEFAULT_INVOICE_PREFIX: &str = "INV";

/// Movement reasons written by invoice operations.
pub mod reason {
    pub const RECEIPT: &str = "invoice receipt";
    pub const REVERTED: &str = "invoice reverted";
    pub const RETURN: &str = "invoice return";
    pub const RETURN_CANCELLED: &str = "invoice return cancelled";
}

/// Upper bound on `-N` suffixes tried when a generated number collides.
const MAX_NUMBER_ATTEMPTS: u32 = 100;

pub type InvoiceEventBus = InMemoryEventBus<EventEnvelope<InvoiceEvent>>;

/// Answers whether a product has left the shop through an order.
///
/// Used before a supplier return is deleted: once the product has been
/// ordered, the returned units can no longer be assumed to sit on the shelf.
pub trait SalesHistory: Send + Sync {
    fn has_been_sold(&self, product: ProductId) -> DomainResult<bool>;
}

impl<T: SalesHistory + ?Sized> SalesHistory for Arc<T> {
    fn has_been_sold(&self, product: ProductId) -> DomainResult<bool> {
        (**self).has_been_sold(product)
    }
}

/// Input for [`InvoiceLifecycle::create_invoice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    /// Generated as `{prefix}-YYYYMMDD-HHMMSS` when absent.
    pub invoice_number: Option<String>,
    pub supplier: String,
    pub sales_point: SalesPointId,
    pub items: Vec<InvoiceItem>,
}

impl NewInvoice {
    pub fn new(supplier: impl Into<String>, sales_point: SalesPointId) -> Self {
        Self {
            invoice_number: None,
            supplier: supplier.into(),
            sales_point,
            items: Vec::new(),
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.invoice_number = Some(number.into());
        self
    }

    pub fn with_item(mut self, product: ProductId, quantity: i64, cost_per_item: u64) -> Self {
        self.items.push(InvoiceItem::new(product, quantity, cost_per_item));
        self
    }
}

/// Input for [`InvoiceLifecycle::record_return`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub invoice_id: InvoiceId,
    pub product: ProductId,
    pub quantity: i64,
    pub reason: String,
}

/// What an invoice operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceOutcome {
    pub invoice: Invoice,
    pub movements: Vec<StockMovement>,
    pub low_stock: Vec<LowStockAlert>,
}

/// One stock row change implied by an invoice event.
#[derive(Debug, Clone, Copy)]
struct StockChange {
    stock_id: StockId,
    delta: i64,
}

/// Supplier invoice processing and returns.
///
/// Every operation locks the invoice first and then the stock rows it
/// moves, so an invoice write and its stock writes commit together or not
/// at all. Events and low-stock checks run after the locks are released.
pub struct InvoiceLifecycle {
    ledger: Arc<StockLedger>,
    store: Arc<InvoiceStore>,
    sales_history: Arc<dyn SalesHistory>,
    events: Arc<InvoiceEventBus>,
    number_prefix: String,
}

impl InvoiceLifecycle {
    pub fn new(
        ledger: Arc<StockLedger>,
        store: Arc<InvoiceStore>,
        sales_history: Arc<dyn SalesHistory>,
        events: Arc<InvoiceEventBus>,
    ) -> Self {
        Self {
            ledger,
            store,
            sales_history,
            events,
            number_prefix: DEFAULT_INVOICE_PREFIX.to_string(),
        }
    }

    pub fn with_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.number_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &Arc<InvoiceStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<InvoiceEventBus> {
        &self.events
    }

    pub fn invoice(&self, id: InvoiceId) -> DomainResult<Invoice> {
        self.store.get(id)
    }

    pub fn create_invoice(&self, actor: &Actor, request: NewInvoice) -> DomainResult<Invoice> {
        authorize_at(actor, Capability::ManageInvoices, request.sales_point)?;

        let now = Utc::now();
        let generated = request.invoice_number.is_none();
        let base = match &request.invoice_number {
            Some(number) => number.trim().to_string(),
            None => self.generate_number(now),
        };

        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let number = if attempt == 1 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            if generated && self.store.number_taken(&number)? {
                continue;
            }

            let invoice_id = InvoiceId::new();
            let mut invoice = Invoice::empty(invoice_id);
            let events = invoice.handle(&InvoiceCommand::Create(CreateInvoice {
                invoice_id,
                invoice_number: number,
                supplier: request.supplier.clone(),
                author: actor.user_id,
                sales_point: request.sales_point,
                items: request.items.clone(),
                occurred_at: now,
            }))?;
            for e in &events {
                invoice.apply(e);
            }

            match self.store.insert(invoice.clone()) {
                // Lost a race for the same generated number.
                Err(DomainError::Conflict(_)) if generated => continue,
                other => other?,
            }

            tracing::info!(
                invoice_id = %invoice_id,
                invoice_number = invoice.invoice_number(),
                sales_point_id = %invoice.sales_point(),
                items = invoice.items().len(),
                total_cost = invoice.total_cost(),
                "invoice created"
            );
            self.publish(invoice_id, 0, events);
            return Ok(invoice);
        }

        Err(DomainError::conflict(format!(
            "no free invoice number after {MAX_NUMBER_ATTEMPTS} attempts from {base}"
        )))
    }

    pub fn add_item(&self, actor: &Actor, invoice_id: InvoiceId, item: InvoiceItem) -> DomainResult<Invoice> {
        self.execute(actor, Capability::ManageInvoices, invoice_id, |_| {
            Ok(InvoiceCommand::AddItem(item))
        })
        .map(|outcome| outcome.invoice)
    }

    pub fn remove_item(&self, actor: &Actor, invoice_id: InvoiceId, index: usize) -> DomainResult<Invoice> {
        self.execute(actor, Capability::ManageInvoices, invoice_id, |_| {
            Ok(InvoiceCommand::RemoveItem { index })
        })
        .map(|outcome| outcome.invoice)
    }

    /// `pendiente → procesada`: receive every line at the invoice's sales point.
    pub fn process(&self, actor: &Actor, invoice_id: InvoiceId) -> DomainResult<InvoiceOutcome> {
        self.execute(actor, Capability::ManageInvoices, invoice_id, |_| {
            Ok(InvoiceCommand::Process { occurred_at: Utc::now() })
        })
    }

    /// `procesada → pendiente | anulada`: take the un-returned remainder back
    /// out of stock. Fails with `InsufficientStock` when it has moved on.
    pub fn revert(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        target: InvoiceStatus,
    ) -> DomainResult<InvoiceOutcome> {
        self.execute(actor, Capability::ManageInvoices, invoice_id, |_| {
            Ok(InvoiceCommand::Revert {
                target,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn record_return(&self, actor: &Actor, request: ReturnRequest) -> DomainResult<InvoiceOutcome> {
        let invoice_id = request.invoice_id;
        self.execute(actor, Capability::ManageReturns, invoice_id, |invoice| {
            Ok(InvoiceCommand::RecordReturn(InvoiceReturn {
                id: ReturnId::new(),
                invoice: invoice_id,
                product: request.product,
                sales_point: invoice.sales_point(),
                quantity: request.quantity,
                reason: request.reason,
                created_at: Utc::now(),
            }))
        })
    }

    /// Cancel a return, putting its units back on the shelf.
    ///
    /// Refused once the product appears on any order.
    pub fn delete_return(&self, actor: &Actor, return_id: ReturnId) -> DomainResult<InvoiceOutcome> {
        let invoice_id = self.store.invoice_for_return(return_id)?;
        self.execute(actor, Capability::ManageReturns, invoice_id, |invoice| {
            if let Some(entry) = invoice.find_return(return_id) {
                if self.sales_history.has_been_sold(entry.product)? {
                    return Err(DomainError::conflict(format!(
                        "product {} has been sold since return {return_id} was recorded",
                        entry.product
                    )));
                }
            }
            Ok(InvoiceCommand::DeleteReturn { return_id })
        })
    }

    fn generate_number(&self, now: DateTime<Utc>) -> String {
        format!("{}-{}", self.number_prefix, now.format("%Y%m%d-%H%M%S"))
    }

    fn execute(
        &self,
        actor: &Actor,
        capability: Capability,
        invoice_id: InvoiceId,
        command: impl FnOnce(&Invoice) -> DomainResult<InvoiceCommand>,
    ) -> DomainResult<InvoiceOutcome> {
        let handle = self.store.handle(invoice_id)?;
        let mut invoice = handle
            .lock()
            .map_err(|_| DomainError::invariant("invoice lock poisoned"))?;

        authorize_at(actor, capability, invoice.sales_point())?;
        let command = command(&*invoice)?;
        let events = invoice.handle(&command)?;

        let (reason, changes) = self.stock_changes(invoice.sales_point(), &events)?;
        let rows: Vec<StockId> = changes.iter().map(|c| c.stock_id).collect();
        let ((), batch) = self.ledger.batch(&rows, reason, |batch| {
            for change in &changes {
                if change.delta > 0 {
                    batch.receive(change.stock_id, change.delta)?;
                } else {
                    batch.adjust(change.stock_id, change.delta)?;
                }
            }
            Ok(())
        })?;

        let base_version = invoice.version();
        let from = invoice.status();
        for e in &events {
            invoice.apply(e);
        }
        let snapshot = invoice.clone();
        drop(invoice);

        for e in &events {
            match e {
                InvoiceEvent::ReturnRecorded { entry, .. } => self.store.index_return(entry.id, invoice_id)?,
                InvoiceEvent::ReturnDeleted { entry, .. } => self.store.unindex_return(entry.id)?,
                _ => {}
            }
        }

        tracing::info!(
            invoice_id = %invoice_id,
            invoice_number = snapshot.invoice_number(),
            from = %from,
            to = %snapshot.status(),
            movements = batch.movements.len(),
            "invoice updated"
        );

        self.publish(invoice_id, base_version, events);
        let low_stock = batch.touched.iter().filter_map(check_low_stock).collect();

        Ok(InvoiceOutcome {
            invoice: snapshot,
            movements: batch.movements,
            low_stock,
        })
    }


    /// Stock rows moved by `events` and the movement reason to record.
    ///
    /// Receipts create the row when missing; removals need stock that is
    /// already there.
    fn stock_changes(
        &self,
        sales_point: SalesPointId,
        events: &[InvoiceEvent],
    ) -> DomainResult<(&'static str, Vec<StockChange>)> {
        let mut movement_reason = reason::RECEIPT;
        let mut moves: Vec<(ProductId, SalesPointId, i64)> = Vec::new();
        for e in events {
            match e {
                InvoiceEvent::Processed { received, .. } => {
                    movement_reason = reason::RECEIPT;
                    moves.extend(received.iter().map(|l| (l.product, sales_point, l.quantity)));
                }
                InvoiceEvent::Reverted { reverted, .. } => {
                    movement_reason = reason::REVERTED;
                    moves.extend(reverted.iter().map(|l| (l.product, sales_point, -l.quantity)));
                }
                InvoiceEvent::ReturnRecorded { entry, .. } => {
                    movement_reason = reason::RETURN;
                    moves.push((entry.product, entry.sales_point, -entry.quantity));
                }
                InvoiceEvent::ReturnDeleted { entry, .. } => {
                    movement_reason = reason::RETURN_CANCELLED;
                    moves.push((entry.product, entry.sales_point, entry.quantity));
                }
                InvoiceEvent::Created(_) | InvoiceEvent::ItemAdded { .. } | InvoiceEvent::ItemRemoved { .. } => {}
            }
        }

        let mut changes = Vec::with_capacity(moves.len());
        for (product, sales_point, delta) in moves {
            let stock_id = if delta > 0 {
                self.ledger.get_or_create(product, sales_point)?.id
            } else {
                self.ledger
                    .get(product, sales_point)?
                    .map(|s| s.id)
                    .ok_or_else(|| DomainError::insufficient_stock(product, Some(sales_point), -delta, 0))?
            };
            changes.push(StockChange { stock_id, delta });
        }
        Ok((movement_reason, changes))
    }

    fn publish(&self, invoice_id: InvoiceId, base_version: u64, events: Vec<InvoiceEvent>) {
        for (offset, event) in events.into_iter().enumerate() {
            let envelope = EventEnvelope::wrap(
                *invoice_id.as_uuid(),
                INVOICE_AGGREGATE_TYPE,
                base_version + offset as u64 + 1,
                event,
            );
            if let Err(err) = self.events.publish(envelope) {
                tracing::warn!(invoice_id = %invoice_id, error = ?err, "failed to publish invoice event");
            }
        }
    }
}
