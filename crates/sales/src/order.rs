use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, OrderId, ProductId, SalesPointId, UserId,
};
use stockroom_events::Event;
use stockroom_inventory::StockId;

/// Order status lifecycle.
///
/// `pendiente → en_proceso → enviado → completado`, with `cancelado` reachable
/// from the first two states and `fallido` entered only through a failed
/// payment. `completado` and `cancelado` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pendiente,
    EnProceso,
    Enviado,
    Completado,
    Cancelado,
    Fallido,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pendiente => "pendiente",
            OrderStatus::EnProceso => "en_proceso",
            OrderStatus::Enviado => "enviado",
            OrderStatus::Completado => "completado",
            OrderStatus::Cancelado => "cancelado",
            OrderStatus::Fallido => "fallido",
        }
    }

    /// Targets reachable through an explicit status change.
    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pendiente => &[EnProceso, Cancelado],
            EnProceso => &[Enviado, Completado, Cancelado],
            Enviado => &[Completado],
            Completado | Cancelado => &[],
            Fallido => &[Pendiente],
        }
    }

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Goods have left the store.
    pub fn is_shipped(&self) -> bool {
        matches!(self, OrderStatus::Enviado | OrderStatus::Completado)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a line is reserved against current stock or supplied later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTime {
    Immediate,
    Backorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

/// Where the order's immediate-delivery units currently stand in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Nothing to reserve (backorder-only order).
    None,
    /// Units are reserved and still on hand.
    Held,
    /// The reservation was given back (cancellation or failed payment).
    Released,
    /// The reservation was turned into an on-hand deduction.
    Committed,
}

/// Why a status change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    Staff,
    Customer,
    PaymentApproved,
    PaymentFailed,
}

/// Ledger work a status change needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    Keep,
    Reserve,
    Release,
    Fulfill,
}

impl StockEffect {
    /// Movement reason recorded for the batch.
    pub fn reason(&self) -> &'static str {
        match self {
            StockEffect::Keep => "order status change",
            StockEffect::Reserve => "order reserved",
            StockEffect::Release => "order released",
            StockEffect::Fulfill => "order fulfilled",
        }
    }
}

/// Units of one order line reserved at one stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub stock_id: StockId,
    pub sales_point: SalesPointId,
    pub quantity: i64,
}

/// Order line with price and cost snapshotted at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: ProductId,
    /// First sales point the line was allocated from, if any.
    pub sales_point: Option<SalesPointId>,
    pub quantity: i64,
    /// Unit price in smallest currency unit.
    pub price: u64,
    pub cost_price: Option<u64>,
    pub delivery_time: DeliveryTime,
    pub allocations: Vec<Allocation>,
}

impl OrderItem {
    pub fn is_immediate(&self) -> bool {
        self.delivery_time == DeliveryTime::Immediate
    }

    pub fn line_total(&self) -> u64 {
        self.price.saturating_mul(self.quantity.max(0) as u64)
    }

    pub fn line_cost(&self) -> u64 {
        self.cost_price
            .unwrap_or(0)
            .saturating_mul(self.quantity.max(0) as u64)
    }

    pub fn allocated(&self) -> i64 {
        self.allocations
            .iter()
            .map(|a| a.quantity)
            .fold(0, i64::saturating_add)
    }

    pub(crate) fn assign(&mut self, allocations: Vec<Allocation>) {
        self.sales_point = allocations.first().map(|a| a.sales_point);
        self.allocations = allocations;
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer: UserId,
    customer_email: String,
    status: OrderStatus,
    items: Vec<OrderItem>,
    total_price: u64,
    total_cost_price: u64,
    payment_method: PaymentMethod,
    reservation: ReservationState,
    created_at: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer: UserId::default(),
            customer_email: String::new(),
            status: OrderStatus::Pendiente,
            items: Vec::new(),
            total_price: 0,
            total_cost_price: 0,
            payment_method: PaymentMethod::Cash,
            reservation: ReservationState::None,
            created_at: Utc::now(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer(&self) -> UserId {
        self.customer
    }

    pub fn customer_email(&self) -> &str {
        &self.customer_email
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn total_cost_price(&self) -> u64 {
        self.total_cost_price
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn reservation(&self) -> ReservationState {
        self.reservation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    pub fn has_immediate_items(&self) -> bool {
        self.items.iter().any(OrderItem::is_immediate)
    }

    /// Validate a status change and work out what it does to stock.
    ///
    /// Shipping an order whose reservation is no longer held is a
    /// fulfillment inconsistency, not an allowed no-op.
    pub fn plan_transition(&self, to: OrderStatus, cause: ChangeCause) -> DomainResult<StockEffect> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {}", self.id)));
        }

        let allowed = match cause {
            ChangeCause::PaymentFailed => {
                to == OrderStatus::Fallido
                    && matches!(self.status, OrderStatus::Pendiente | OrderStatus::EnProceso)
            }
            _ => self.status.can_transition_to(to),
        };
        if !allowed {
            return Err(DomainError::invalid_transition("order", self.status, to));
        }

        let effect = match to {
            OrderStatus::Cancelado | OrderStatus::Fallido => match self.reservation {
                ReservationState::Held => StockEffect::Release,
                _ => StockEffect::Keep,
            },
            OrderStatus::Enviado | OrderStatus::Completado if !self.status.is_shipped() => {
                match self.reservation {
                    ReservationState::Held => StockEffect::Fulfill,
                    ReservationState::None => StockEffect::Keep,
                    other => {
                        return Err(DomainError::invariant(format!(
                            "order {} cannot ship with reservation {other:?}",
                            self.id
                        )));
                    }
                }
            }
            OrderStatus::EnProceso if self.reservation == ReservationState::Released => {
                StockEffect::Reserve
            }
            _ => StockEffect::Keep,
        };
        Ok(effect)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
///
/// Items arrive with their allocations already computed inside the ledger
/// batch that reserved them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderCommand {
    pub order_id: OrderId,
    pub customer: UserId,
    pub customer_email: String,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub cause: ChangeCause,
    /// Fresh allocations when the change re-reserves stock, one entry per item.
    pub allocations: Option<Vec<Vec<Allocation>>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Place(PlaceOrderCommand),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer: UserId,
    pub customer_email: String,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderItem>,
    pub total_price: u64,
    pub total_cost_price: u64,
    pub reservation: ReservationState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub cause: ChangeCause,
    pub reservation: ReservationState,
    pub allocations: Option<Vec<Vec<Allocation>>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    StatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "sales.order.placed",
            OrderEvent::StatusChanged(_) => "sales.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed(e) => {
                self.id = e.order_id;
                self.customer = e.customer;
                self.customer_email = e.customer_email.clone();
                self.payment_method = e.payment_method;
                self.items = e.items.clone();
                self.total_price = e.total_price;
                self.total_cost_price = e.total_cost_price;
                self.reservation = e.reservation;
                self.status = OrderStatus::Pendiente;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.reservation = e.reservation;
                if let Some(allocations) = &e.allocations {
                    for (item, allocs) in self.items.iter_mut().zip(allocations) {
                        item.assign(allocs.clone());
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn handle_place(&self, cmd: &PlaceOrderCommand) -> DomainResult<Vec<OrderEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!("order {} already exists", cmd.order_id)));
        }
        if cmd.order_id != self.id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("an order needs at least one item"));
        }

        for item in &cmd.items {
            if item.quantity <= 0 {
                return Err(DomainError::invalid_quantity(
                    item.quantity,
                    format!("order line for product {}", item.product),
                ));
            }
            let expected = if item.is_immediate() { item.quantity } else { 0 };
            if item.allocated() != expected {
                return Err(DomainError::invariant(format!(
                    "product {} allocated {} of {expected} units",
                    item.product,
                    item.allocated()
                )));
            }
        }

        let reservation = if cmd.items.iter().any(OrderItem::is_immediate) {
            ReservationState::Held
        } else {
            ReservationState::None
        };

        Ok(vec![OrderEvent::Placed(OrderPlaced {
            order_id: cmd.order_id,
            customer: cmd.customer,
            customer_email: cmd.customer_email.clone(),
            payment_method: cmd.payment_method,
            items: cmd.items.clone(),
            total_price: cmd
                .items
                .iter()
                .map(OrderItem::line_total)
                .fold(0, u64::saturating_add),
            total_cost_price: cmd
                .items
                .iter()
                .map(OrderItem::line_cost)
                .fold(0, u64::saturating_add),
            reservation,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> DomainResult<Vec<OrderEvent>> {
        if cmd.order_id != self.id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        let effect = self.plan_transition(cmd.to, cmd.cause)?;

        let reservation = match effect {
            StockEffect::Keep => self.reservation,
            StockEffect::Reserve => ReservationState::Held,
            StockEffect::Release => ReservationState::Released,
            StockEffect::Fulfill => ReservationState::Committed,
        };

        match (&cmd.allocations, effect) {
            (Some(allocations), StockEffect::Reserve) if allocations.len() == self.items.len() => {}
            (None, effect) if effect != StockEffect::Reserve => {}
            _ => {
                return Err(DomainError::invariant(
                    "allocations must accompany exactly the re-reserving status changes",
                ));
            }
        }

        Ok(vec![OrderEvent::StatusChanged(OrderStatusChanged {
            order_id: self.id,
            from: self.status,
            to: cmd.to,
            cause: cmd.cause,
            reservation,
            allocations: cmd.allocations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
