use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, InvoiceId, ProductId, ReturnId, SalesPointId,
    UserId,
};
use stockroom_events::Event;

/// Supplier invoice status.
///
/// `pendiente → procesada → anulada`, plus `procesada → pendiente` as a
/// correction path. Nothing changes once an invoice is `anulada`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pendiente,
    Procesada,
    Anulada,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pendiente => "pendiente",
            InvoiceStatus::Procesada => "procesada",
            InvoiceStatus::Anulada => "anulada",
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub product: ProductId,
    pub quantity: i64,
    /// Unit cost in smallest currency unit.
    pub cost_per_item: u64,
}

impl InvoiceItem {
    pub fn new(product: ProductId, quantity: i64, cost_per_item: u64) -> Self {
        Self {
            product,
            quantity,
            cost_per_item,
        }
    }

    pub fn total_cost(&self) -> u64 {
        self.cost_per_item.saturating_mul(self.quantity.max(0) as u64)
    }
}

/// Goods sent back to the supplier against a processed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceReturn {
    pub id: ReturnId,
    pub invoice: InvoiceId,
    pub product: ProductId,
    pub sales_point: SalesPointId,
    pub quantity: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Quantity of one product moved by an invoice operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product: ProductId,
    pub quantity: i64,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    invoice_number: String,
    supplier: String,
    author: UserId,
    sales_point: SalesPointId,
    status: InvoiceStatus,
    items: Vec<InvoiceItem>,
    returns: Vec<InvoiceReturn>,
    created_at: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            invoice_number: String::new(),
            supplier: String::new(),
            author: UserId::default(),
            sales_point: SalesPointId::default(),
            status: InvoiceStatus::Pendiente,
            items: Vec::new(),
            returns: Vec::new(),
            created_at: Utc::now(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    pub fn author(&self) -> UserId {
        self.author
    }

    pub fn sales_point(&self) -> SalesPointId {
        self.sales_point
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn returns(&self) -> &[InvoiceReturn] {
        &self.returns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total_cost(&self) -> u64 {
        self.items
            .iter()
            .map(InvoiceItem::total_cost)
            .fold(0, u64::saturating_add)
    }

    pub fn purchased(&self, product: ProductId) -> i64 {
        self.items
            .iter()
            .filter(|i| i.product == product)
            .map(|i| i.quantity)
            .fold(0, i64::saturating_add)
    }

    pub fn returned(&self, product: ProductId) -> i64 {
        self.returns
            .iter()
            .filter(|r| r.product == product)
            .map(|r| r.quantity)
            .fold(0, i64::saturating_add)
    }

    /// How many more units of `product` may still go back to the supplier.
    pub fn returnable(&self, product: ProductId) -> i64 {
        self.purchased(product) - self.returned(product)
    }

    pub fn find_return(&self, id: ReturnId) -> Option<&InvoiceReturn> {
        self.returns.iter().find(|r| r.id == id)
    }

    /// Purchased minus returned, per product, skipping products fully returned.
    pub fn unreturned(&self) -> Vec<StockLine> {
        let mut totals: BTreeMap<ProductId, i64> = BTreeMap::new();
        for item in &self.items {
            *totals.entry(item.product).or_insert(0) += item.quantity;
        }
        for ret in &self.returns {
            *totals.entry(ret.product).or_insert(0) -= ret.quantity;
        }
        totals
            .into_iter()
            .filter(|(_, qty)| *qty > 0)
            .map(|(product, quantity)| StockLine { product, quantity })
            .collect()
    }

    fn ensure_created(&self) -> DomainResult<()> {
        if self.created {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("invoice {}", self.id)))
        }
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Pendiente {
            return Err(DomainError::conflict(format!(
                "invoice {} is {}; items can only change while pendiente",
                self.invoice_number, self.status
            )));
        }
        Ok(())
    }

    fn ensure_processed(&self, action: &str) -> DomainResult<()> {
        if self.status != InvoiceStatus::Procesada {
            return Err(DomainError::conflict(format!(
                "cannot {action} on invoice {} while it is {}",
                self.invoice_number, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub supplier: String,
    pub author: UserId,
    pub sales_point: SalesPointId,
    pub items: Vec<InvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Create(CreateInvoice),
    AddItem(InvoiceItem),
    RemoveItem { index: usize },
    Process { occurred_at: DateTime<Utc> },
    /// `target` is `Pendiente` (correction) or `Anulada` (void).
    Revert {
        target: InvoiceStatus,
        occurred_at: DateTime<Utc>,
    },
    RecordReturn(InvoiceReturn),
    DeleteReturn { return_id: ReturnId },
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub supplier: String,
    pub author: UserId,
    pub sales_point: SalesPointId,
    pub items: Vec<InvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Created(InvoiceCreated),
    ItemAdded {
        invoice_id: InvoiceId,
        item: InvoiceItem,
        occurred_at: DateTime<Utc>,
    },
    ItemRemoved {
        invoice_id: InvoiceId,
        index: usize,
        occurred_at: DateTime<Utc>,
    },
    /// Stock received at the invoice's sales point.
    Processed {
        invoice_id: InvoiceId,
        received: Vec<StockLine>,
        occurred_at: DateTime<Utc>,
    },
    /// Stock taken back out of the invoice's sales point.
    Reverted {
        invoice_id: InvoiceId,
        target: InvoiceStatus,
        reverted: Vec<StockLine>,
        occurred_at: DateTime<Utc>,
    },
    ReturnRecorded {
        invoice_id: InvoiceId,
        entry: InvoiceReturn,
    },
    ReturnDeleted {
        invoice_id: InvoiceId,
        entry: InvoiceReturn,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created(_) => "purchasing.invoice.created",
            InvoiceEvent::ItemAdded { .. } => "purchasing.invoice.item_added",
            InvoiceEvent::ItemRemoved { .. } => "purchasing.invoice.item_removed",
            InvoiceEvent::Processed { .. } => "purchasing.invoice.processed",
            InvoiceEvent::Reverted { .. } => "purchasing.invoice.reverted",
            InvoiceEvent::ReturnRecorded { .. } => "purchasing.invoice.return_recorded",
            InvoiceEvent::ReturnDeleted { .. } => "purchasing.invoice.return_deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Created(e) => e.occurred_at,
            InvoiceEvent::ItemAdded { occurred_at, .. }
            | InvoiceEvent::ItemRemoved { occurred_at, .. }
            | InvoiceEvent::Processed { occurred_at, .. }
            | InvoiceEvent::Reverted { occurred_at, .. }
            | InvoiceEvent::ReturnDeleted { occurred_at, .. } => *occurred_at,
            InvoiceEvent::ReturnRecorded { entry, .. } => entry.created_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Created(e) => {
                self.id = e.invoice_id;
                self.invoice_number = e.invoice_number.clone();
                self.supplier = e.supplier.clone();
                self.author = e.author;
                self.sales_point = e.sales_point;
                self.items = e.items.clone();
                self.status = InvoiceStatus::Pendiente;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            InvoiceEvent::ItemAdded { item, .. } => self.items.push(item.clone()),
            InvoiceEvent::ItemRemoved { index, .. } => {
                if *index < self.items.len() {
                    self.items.remove(*index);
                }
            }
            InvoiceEvent::Processed { .. } => self.status = InvoiceStatus::Procesada,
            InvoiceEvent::Reverted { target, .. } => self.status = *target,
            InvoiceEvent::ReturnRecorded { entry, .. } => self.returns.push(entry.clone()),
            InvoiceEvent::ReturnDeleted { entry, .. } => self.returns.retain(|r| r.id != entry.id),
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Create(cmd) => self.handle_create(cmd),
            InvoiceCommand::AddItem(item) => self.handle_add_item(item),
            InvoiceCommand::RemoveItem { index } => self.handle_remove_item(*index),
            InvoiceCommand::Process { occurred_at } => self.handle_process(*occurred_at),
            InvoiceCommand::Revert { target, occurred_at } => self.handle_revert(*target, *occurred_at),
            InvoiceCommand::RecordReturn(entry) => self.handle_record_return(entry),
            InvoiceCommand::DeleteReturn { return_id } => self.handle_delete_return(*return_id),
        }
    }
}

fn validate_item(item: &InvoiceItem) -> DomainResult<()> {
    if item.quantity <= 0 {
        return Err(DomainError::invalid_quantity(
            item.quantity,
            format!("invoice line for product {}", item.product),
        ));
    }
    Ok(())
}

impl Invoice {
    fn handle_create(&self, cmd: &CreateInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!("invoice {} already exists", cmd.invoice_id)));
        }
        if cmd.invoice_id != self.id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be blank"));
        }
        if cmd.supplier.trim().is_empty() {
            return Err(DomainError::validation("supplier is required"));
        }
        cmd.items.iter().try_for_each(validate_item)?;

        Ok(vec![InvoiceEvent::Created(InvoiceCreated {
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.clone(),
            supplier: cmd.supplier.clone(),
            author: cmd.author,
            sales_point: cmd.sales_point,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, item: &InvoiceItem) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        self.ensure_editable()?;
        validate_item(item)?;
        Ok(vec![InvoiceEvent::ItemAdded {
            invoice_id: self.id,
            item: item.clone(),
            occurred_at: Utc::now(),
        }])
    }

    fn handle_remove_item(&self, index: usize) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        self.ensure_editable()?;
        let item = self
            .items
            .get(index)
            .ok_or_else(|| DomainError::not_found(format!("item #{index} of invoice {}", self.invoice_number)))?;

        // A reverted invoice keeps its returns; the lines must still cover them.
        let left = self.purchased(item.product) - item.quantity;
        let returned = self.returned(item.product);
        if left < returned {
            return Err(DomainError::conflict(format!(
                "product {} has {returned} units returned; removing the line would leave {left}",
                item.product
            )));
        }

        Ok(vec![InvoiceEvent::ItemRemoved {
            invoice_id: self.id,
            index,
            occurred_at: Utc::now(),
        }])
    }

    fn handle_process(&self, occurred_at: DateTime<Utc>) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        if self.status != InvoiceStatus::Pendiente {
            return Err(DomainError::invalid_transition(
                "invoice",
                self.status,
                InvoiceStatus::Procesada,
            ));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation(format!(
                "invoice {} has no items to process",
                self.invoice_number
            )));
        }

        Ok(vec![InvoiceEvent::Processed {
            invoice_id: self.id,
            received: self.unreturned(),
            occurred_at,
        }])
    }

    fn handle_revert(&self, target: InvoiceStatus, occurred_at: DateTime<Utc>) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        let allowed = self.status == InvoiceStatus::Procesada
            && matches!(target, InvoiceStatus::Pendiente | InvoiceStatus::Anulada);
        if !allowed {
            return Err(DomainError::invalid_transition("invoice", self.status, target));
        }

        Ok(vec![InvoiceEvent::Reverted {
            invoice_id: self.id,
            target,
            reverted: self.unreturned(),
            occurred_at,
        }])
    }

    fn handle_record_return(&self, entry: &InvoiceReturn) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        self.ensure_processed("record a return")?;
        if entry.invoice != self.id {
            return Err(DomainError::invariant("return targets another invoice"));
        }
        if entry.quantity <= 0 {
            return Err(DomainError::invalid_quantity(entry.quantity, "returned quantity must be positive"));
        }

        let purchased = self.purchased(entry.product);
        if purchased == 0 {
            return Err(DomainError::validation(format!(
                "product {} is not on invoice {}",
                entry.product, self.invoice_number
            )));
        }
        let returnable = self.returnable(entry.product);
        if entry.quantity > returnable {
            return Err(DomainError::invalid_quantity(
                entry.quantity,
                format!(
                    "only {returnable} of {purchased} units of product {} can still be returned",
                    entry.product
                ),
            ));
        }

        Ok(vec![InvoiceEvent::ReturnRecorded {
            invoice_id: self.id,
            entry: entry.clone(),
        }])
    }

    fn handle_delete_return(&self, return_id: ReturnId) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_created()?;
        self.ensure_processed("delete a return")?;
        let entry = self
            .find_return(return_id)
            .ok_or_else(|| DomainError::not_found(format!("return {return_id}")))?;

        Ok(vec![InvoiceEvent::ReturnDeleted {
            invoice_id: self.id,
            entry: entry.clone(),
            occurred_at: Utc::now(),
        }])
    }
}
