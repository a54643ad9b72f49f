//! `stockroom-backoffice`: wires the domain crates into one back office.
//!
//! Outer layers (HTTP, admin UI, payment webhooks) hold a [`BackOffice`] and
//! call into its lifecycles with an already-authenticated
//! [`Actor`](stockroom_auth::Actor).

pub mod config;

use std::sync::Arc;

use stockroom_core::{DomainResult, ProductId};
use stockroom_inventory::{SalesPointDirectory, StockLedger};
use stockroom_products::InMemoryCatalog;
use stockroom_purchasing::{InvoiceEventBus, InvoiceLifecycle, InvoiceStore, SalesHistory};
use stockroom_sales::{BusNotifier, NoopNotifier, Notifier, OrderEventBus, OrderLifecycle, OrderStore};

pub use config::BackOfficeConfig;

/// Return deletion asks the order side whether a product ever sold.
#[derive(Debug, Clone)]
pub struct OrderHistory {
    orders: Arc<OrderStore>,
}

impl OrderHistory {
    pub fn new(orders: Arc<OrderStore>) -> Self {
        Self { orders }
    }
}

impl SalesHistory for OrderHistory {
    fn has_been_sold(&self, product: ProductId) -> DomainResult<bool> {
        self.orders.has_ordered(product)
    }
}

/// In-memory back office: catalog, sales points, stock, orders and invoices
/// sharing one stock ledger.
pub struct BackOffice {
    config: BackOfficeConfig,
    catalog: Arc<InMemoryCatalog>,
    sales_points: Arc<SalesPointDirectory>,
    ledger: Arc<StockLedger>,
    notifications: Option<Arc<BusNotifier>>,
    orders: OrderLifecycle,
    invoices: InvoiceLifecycle,
}

impl BackOffice {
    pub fn new(config: BackOfficeConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let sales_points = Arc::new(SalesPointDirectory::new());
        let ledger = Arc::new(StockLedger::with_default_threshold(i64::from(
            config.low_stock_threshold,
        )));
        let order_store = Arc::new(OrderStore::new());

        let notifications = config.notifications.then(|| Arc::new(BusNotifier::new()));
        let notifier: Arc<dyn Notifier> = match &notifications {
            Some(bus) => Arc::clone(bus) as Arc<dyn Notifier>,
            None => Arc::new(NoopNotifier),
        };

        let orders = OrderLifecycle::new(
            Arc::clone(&ledger),
            catalog.clone(),
            Arc::clone(&sales_points),
            Arc::clone(&order_store),
            Arc::new(OrderEventBus::new()),
            notifier,
        );
        let invoices = InvoiceLifecycle::new(
            Arc::clone(&ledger),
            Arc::new(InvoiceStore::new()),
            Arc::new(OrderHistory::new(order_store)),
            Arc::new(InvoiceEventBus::new()),
        )
        .with_number_prefix(config.invoice_prefix.clone());

        tracing::info!(
            low_stock_threshold = config.low_stock_threshold,
            invoice_prefix = %config.invoice_prefix,
            notifications = config.notifications,
            "back office ready"
        );

        Self {
            config,
            catalog,
            sales_points,
            ledger,
            notifications,
            orders,
            invoices,
        }
    }

    /// Read configuration from the environment, install tracing and build.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = BackOfficeConfig::from_env()?;
        stockroom_observability::init(config.log_format);
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &BackOfficeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<InMemoryCatalog> {
        &self.catalog
    }

    pub fn sales_points(&self) -> &Arc<SalesPointDirectory> {
        &self.sales_points
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderLifecycle {
        &self.orders
    }

    pub fn invoices(&self) -> &InvoiceLifecycle {
        &self.invoices
    }

    /// Queued notifications, when enabled.
    pub fn notifications(&self) -> Option<&Arc<BusNotifier>> {
        self.notifications.as_ref()
    }
}

impl Default for BackOffice {
    fn default() -> Self {
        Self::new(BackOfficeConfig::default())
    }
}
