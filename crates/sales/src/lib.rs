//! Sales domain module: customer orders and the stock they hold.
//!
//! [`OrderLifecycle`] owns the order status machine and drives the
//! [`ReservationService`], which spreads each order's quantities across the
//! stock rows of the [`stockroom_inventory::StockLedger`].

pub mod cart;
pub mod lifecycle;
pub mod notification;
pub mod order;
pub mod reservation;
pub mod store;

pub use cart::{CartLine, PlaceOrder};
pub use lifecycle::{OrderEventBus, OrderLifecycle, OrderOutcome, PaymentOutcome};
pub use notification::{BusNotifier, NoopNotifier, Notification, Notifier, NotifyError};
pub use order::{
    Allocation, ChangeCause, DeliveryTime, Order, OrderEvent, OrderItem, OrderStatus, PaymentMethod,
    ReservationState, StockEffect,
};
pub use reservation::ReservationService;
pub use store::OrderStore;
