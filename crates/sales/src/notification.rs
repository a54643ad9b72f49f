use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroom_core::{OrderId, SalesPointId};
use stockroom_events::{EventBus, InMemoryEventBus};

use crate::order::OrderStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort outbound notifications (e-mail in production).
///
/// Callers log and swallow every error; a failed notification never fails
/// the order operation that triggered it.
pub trait Notifier: Send + Sync {
    /// Tell the staff of a sales point that a new order needs attention.
    fn notify(
        &self,
        order_id: OrderId,
        sales_point: SalesPointId,
        staff_emails: &[String],
    ) -> Result<(), NotifyError>;

    /// Tell a customer their order moved to a new status.
    fn notify_status_change(
        &self,
        user_email: &str,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), NotifyError>;
}

/// Message handed to whatever delivers notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    NewOrder {
        order_id: OrderId,
        sales_point: SalesPointId,
        staff_emails: Vec<String>,
    },
    StatusChanged {
        user_email: String,
        order_id: OrderId,
        status: OrderStatus,
    },
}

/// Queues notifications on an in-memory bus for a delivery worker to drain.
#[derive(Debug, Default)]
pub struct BusNotifier {
    bus: InMemoryEventBus<Notification>,
}

impl BusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self) -> &InMemoryEventBus<Notification> {
        &self.bus
    }

    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.bus
            .publish(notification)
            .map_err(|e| NotifyError::Unavailable(format!("{e:?}")))
    }
}

impl Notifier for BusNotifier {
    fn notify(
        &self,
        order_id: OrderId,
        sales_point: SalesPointId,
        staff_emails: &[String],
    ) -> Result<(), NotifyError> {
        self.send(Notification::NewOrder {
            order_id,
            sales_point,
            staff_emails: staff_emails.to_vec(),
        })
    }

    fn notify_status_change(
        &self,
        user_email: &str,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), NotifyError> {
        self.send(Notification::StatusChanged {
            user_email: user_email.to_string(),
            order_id,
            status,
        })
    }
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _: OrderId, _: SalesPointId, _: &[String]) -> Result<(), NotifyError> {
        Ok(())
    }

    fn notify_status_change(&self, _: &str, _: OrderId, _: OrderStatus) -> Result<(), NotifyError> {
        Ok(())
    }
}
