use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use stockroom_auth::{Actor, Capability, authorize};
use stockroom_core::{Aggregate, AggregateRoot, DomainError, DomainResult, OrderId, SalesPointId, UserId};
use stockroom_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockroom_inventory::{
    LowStockAlert, SalesPointDirectory, Stock, StockLedger, StockMovement, check_low_stock,
};
use stockroom_products::Catalog;

use crate::cart::PlaceOrder;
use crate::notification::Notifier;
use crate::order::{
    ChangeCause, ChangeStatus, Order, OrderCommand, OrderEvent, OrderStatus, PlaceOrderCommand,
    StockEffect,
};
use crate::reservation::ReservationService;
use crate::store::OrderStore;

/// Aggregate type tag on published order envelopes.
pub const ORDER_AGGREGATE_TYPE: &str = "sales.order";

/// Movement reason for the reservation made at checkout.
pub const ORDER_PLACED_REASON: &str = "order placed";

pub type OrderEventBus = InMemoryEventBus<EventEnvelope<OrderEvent>>;

/// Result reported by the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Approved,
    Rejected,
    Cancelled,
}

/// What an order operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    pub order: Order,
    /// `false` when an idempotent call found nothing to do.
    pub changed: bool,
    pub movements: Vec<StockMovement>,
    pub low_stock: Vec<LowStockAlert>,
}

impl OrderOutcome {
    fn unchanged(order: Order) -> Self {
        Self {
            order,
            changed: false,
            movements: Vec::new(),
            low_stock: Vec::new(),
        }
    }
}

/// Drives orders through their status machine and keeps stock in step.
///
/// Creation reserves stock and stores the order inside one ledger batch.
/// A status change takes the order's lock first and then the stock rows it
/// touches; the new status is applied only after the batch has committed.
/// Events, low-stock checks and notifications run after every lock is
/// released, and their failures are logged, never returned.
pub struct OrderLifecycle {
    reservations: ReservationService,
    catalog: Arc<dyn Catalog>,
    sales_points: Arc<SalesPointDirectory>,
    store: Arc<OrderStore>,
    events: Arc<OrderEventBus>,
    notifier: Arc<dyn Notifier>,
}

impl OrderLifecycle {
    pub fn new(
        ledger: Arc<StockLedger>,
        catalog: Arc<dyn Catalog>,
        sales_points: Arc<SalesPointDirectory>,
        store: Arc<OrderStore>,
        events: Arc<OrderEventBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            reservations: ReservationService::new(ledger),
            catalog,
            sales_points,
            store,
            events,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<OrderEventBus> {
        &self.events
    }

    pub fn order(&self, id: OrderId) -> DomainResult<Order> {
        self.store.get(id)
    }

    pub fn orders_for(&self, customer: UserId) -> DomainResult<Vec<Order>> {
        self.store.for_customer(customer)
    }

    /// Turn a cart snapshot into a `pendiente` order.
    ///
    /// Immediate-delivery lines are reserved in the same unit of work that
    /// stores the order; if any product falls short nothing is written.
    pub fn create_order(&self, request: PlaceOrder) -> DomainResult<OrderOutcome> {
        authorize(&request.customer, Capability::PlaceOrder)?;
        request.validate()?;

        let items = request.snapshot_items(self.catalog.as_ref())?;
        let home = request.customer.home_sales_point();
        let order_id = OrderId::new();
        let rows = self.reservations.stock_rows(&items)?;

        let ((order, events), batch) = self.ledger().batch(&rows, ORDER_PLACED_REASON, |batch| {
            let allocations = self.reservations.reserve_for_order(batch, &items, home)?;
            let mut items = items.clone();
            for (item, allocs) in items.iter_mut().zip(allocations) {
                item.assign(allocs);
            }

            let mut order = Order::empty(order_id);
            let events = order.handle(&OrderCommand::Place(PlaceOrderCommand {
                order_id,
                customer: request.customer.user_id,
                customer_email: request.customer.email.clone(),
                payment_method: request.payment_method,
                items,
                occurred_at: Utc::now(),
            }))?;
            for e in &events {
                order.apply(e);
            }
            Ok((order, events))
        })?;
        // Stored only once the reservation is written back.
        self.store.insert(order.clone())?;

        tracing::info!(
            order_id = %order_id,
            customer_id = %order.customer(),
            items = order.items().len(),
            total_price = order.total_price(),
            "order placed"
        );

        self.publish(order_id, 0, events);
        let low_stock = low_stock_alerts(&batch.touched);
        self.notify_staff(&order);

        Ok(OrderOutcome {
            order,
            changed: true,
            movements: batch.movements,
            low_stock,
        })
    }

    /// Move an order to `to`.
    ///
    /// Owners may cancel their own orders; every other change needs
    /// [`Capability::ManageOrders`].
    pub fn transition(&self, actor: &Actor, order_id: OrderId, to: OrderStatus) -> DomainResult<OrderOutcome> {
        self.drive(order_id, actor.home_sales_point(), |order| {
            let cause = if to == OrderStatus::Cancelado && order.customer() == actor.user_id {
                ChangeCause::Customer
            } else {
                authorize(actor, Capability::ManageOrders)?;
                ChangeCause::Staff
            };
            Ok(Some((to, cause)))
        })
    }

    pub fn cancel(&self, actor: &Actor, order_id: OrderId) -> DomainResult<OrderOutcome> {
        self.transition(actor, order_id, OrderStatus::Cancelado)
    }

    /// Idempotent entry point for the payment gateway.
    ///
    /// Approval moves `pendiente` to `en_proceso` and is a no-op once the order
    /// is already there or shipped. Rejection or cancellation moves
    /// `pendiente`/`en_proceso` to `fallido`, giving the reservation back, and is
    /// a no-op on an order that already failed.
    pub fn record_payment_outcome(&self, order_id: OrderId, outcome: PaymentOutcome) -> DomainResult<OrderOutcome> {
        self.drive(order_id, None, |order| {
            let status = order.status();
            match outcome {
                PaymentOutcome::Approved => match status {
                    OrderStatus::Pendiente => {
                        Ok(Some((OrderStatus::EnProceso, ChangeCause::PaymentApproved)))
                    }
                    OrderStatus::EnProceso | OrderStatus::Enviado | OrderStatus::Completado => Ok(None),
                    other => Err(DomainError::invalid_transition("order", other, OrderStatus::EnProceso)),
                },
                PaymentOutcome::Rejected | PaymentOutcome::Cancelled => match status {
                    OrderStatus::Pendiente | OrderStatus::EnProceso => {
                        Ok(Some((OrderStatus::Fallido, ChangeCause::PaymentFailed)))
                    }
                    OrderStatus::Fallido => Ok(None),
                    other => Err(DomainError::invalid_transition("order", other, OrderStatus::Fallido)),
                },
            }
        })
    }

    fn ledger(&self) -> &Arc<StockLedger> {
        self.reservations.ledger()
    }

    fn drive(
        &self,
        order_id: OrderId,
        home: Option<SalesPointId>,
        decide: impl FnOnce(&Order) -> DomainResult<Option<(OrderStatus, ChangeCause)>>,
    ) -> DomainResult<OrderOutcome> {
        let handle = self.store.handle(order_id)?;
        let mut order = handle
            .lock()
            .map_err(|_| DomainError::invariant("order lock poisoned"))?;

        let Some((to, cause)) = decide(&*order)? else {
            tracing::debug!(order_id = %order_id, status = %order.status(), "nothing to do");
            return Ok(OrderOutcome::unchanged(order.clone()));
        };

        let from = order.status();
        let effect = order.plan_transition(to, cause)?;
        let rows = match effect {
            StockEffect::Keep => Vec::new(),
            _ => self.reservations.stock_rows(order.items())?,
        };
        let base_version = order.version();

        let (events, batch) = self.ledger().batch(&rows, effect.reason(), |batch| {
            let allocations = match effect {
                StockEffect::Reserve => {
                    Some(self.reservations.reserve_for_order(batch, order.items(), home)?)
                }
                StockEffect::Release => {
                    self.reservations.release_for_order(batch, &order)?;
                    None
                }
                StockEffect::Fulfill => {
                    self.reservations.fulfill_for_order(batch, &order)?;
                    None
                }
                StockEffect::Keep => None,
            };
            order.handle(&OrderCommand::ChangeStatus(ChangeStatus {
                order_id,
                to,
                cause,
                allocations,
                occurred_at: Utc::now(),
            }))
        })?;

        for e in &events {
            order.apply(e);
        }
        let snapshot = order.clone();
        drop(order);

        tracing::info!(
            order_id = %order_id,
            from = %from,
            to = %to,
            cause = ?cause,
            effect = ?effect,
            "order status changed"
        );

        self.publish(order_id, base_version, events);
        let low_stock = low_stock_alerts(&batch.touched);
        self.notify_customer(&snapshot);

        Ok(OrderOutcome {
            order: snapshot,
            changed: true,
            movements: batch.movements,
            low_stock,
        })
    }

    fn publish(&self, order_id: OrderId, base_version: u64, events: Vec<OrderEvent>) {
        for (offset, event) in events.into_iter().enumerate() {
            let envelope = EventEnvelope::wrap(
                *order_id.as_uuid(),
                ORDER_AGGREGATE_TYPE,
                base_version + offset as u64 + 1,
                event,
            );
            if let Err(err) = self.events.publish(envelope) {
                tracing::warn!(order_id = %order_id, error = ?err, "failed to publish order event");
            }
        }
    }

    /// Tell the staff of every sales point stocking an ordered product.
    fn notify_staff(&self, order: &Order) {
        let mut sales_points = BTreeSet::new();
        for item in order.items() {
            match self.ledger().stocks_for_product(item.product) {
                Ok(rows) => sales_points.extend(rows.iter().map(|s| s.sales_point)),
                Err(err) => {
                    tracing::warn!(order_id = %order.id(), error = %err, "cannot resolve stocking sales points");
                }
            }
        }

        for sales_point in sales_points {
            let emails = match self.sales_points.staff_emails(sales_point) {
                Ok(emails) if !emails.is_empty() => emails,
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(sales_point_id = %sales_point, error = %err, "no staff to notify");
                    continue;
                }
            };
            if let Err(err) = self.notifier.notify(*order.id(), sales_point, &emails) {
                tracing::warn!(
                    order_id = %order.id(),
                    sales_point_id = %sales_point,
                    error = %err,
                    "staff notification failed"
                );
            }
        }
    }

    fn notify_customer(&self, order: &Order) {
        if order.customer_email().is_empty() {
            return;
        }
        if let Err(err) =
            self.notifier
                .notify_status_change(order.customer_email(), *order.id(), order.status())
        {
            tracing::warn!(order_id = %order.id(), error = %err, "status notification failed");
        }
    }
}

fn low_stock_alerts(touched: &[Stock]) -> Vec<LowStockAlert> {
    touched.iter().filter_map(check_low_stock).collect()
}
