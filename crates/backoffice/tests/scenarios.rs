use std::sync::Arc;
use std::thread;

use stockroom_auth::{Actor, Role};
use stockroom_backoffice::{BackOffice, BackOfficeConfig};
use stockroom_core::{DomainError, ProductId, SalesPointId, UserId};
use stockroom_inventory::SalesPoint;
use stockroom_products::Product;
use stockroom_purchasing::{InvoiceStatus, NewInvoice, ReturnRequest};
use stockroom_sales::{CartLine, Notification, OrderStatus, PaymentMethod, PaymentOutcome, PlaceOrder};

fn admin() -> Actor {
    Actor::new(UserId::new(), "admin@example.com", Role::Admin)
}

fn customer() -> Actor {
    Actor::customer("buyer@example.com")
}

fn widget(office: &BackOffice) -> ProductId {
    let product = Product::new("Widget", 1_000).with_cost_price(600);
    let id = product.id;
    office.catalog().upsert(product);
    id
}

fn stocked(office: &BackOffice, sales_point: SalesPointId, qty: i64) -> ProductId {
    let product = widget(office);
    office
        .ledger()
        .receive(product, sales_point, qty, "opening balance")
        .unwrap();
    product
}

fn order(product: ProductId, qty: i64) -> PlaceOrder {
    PlaceOrder::new(customer(), vec![CartLine::immediate(product, qty)], PaymentMethod::Card)
}

fn levels(office: &BackOffice, product: ProductId, sales_point: SalesPointId) -> (i64, i64) {
    let stock = office.ledger().get(product, sales_point).unwrap().unwrap();
    (stock.quantity, stock.reserved_quantity)
}

#[test]
fn scenario_a_and_b_reserve_then_fulfill_on_shipping() {
    let office = BackOffice::default();
    let sp = SalesPointId::new();
    let product = stocked(&office, sp, 20);

    // A
    let placed = office.orders().create_order(order(product, 3)).unwrap();
    assert_eq!(placed.order.status(), OrderStatus::Pendiente);
    assert_eq!(levels(&office, product, sp), (20, 3));
    assert_eq!(office.ledger().total_available(product).unwrap(), 17);

    // B
    let id = placed.order.id_typed();
    office.orders().transition(&admin(), id, OrderStatus::EnProceso).unwrap();
    assert_eq!(levels(&office, product, sp), (20, 3));

    office.orders().transition(&admin(), id, OrderStatus::Enviado).unwrap();
    assert_eq!(levels(&office, product, sp), (17, 0));

    office.orders().transition(&admin(), id, OrderStatus::Completado).unwrap();
    assert_eq!(levels(&office, product, sp), (17, 0));
    assert!(office.ledger().reconcile(product, sp).unwrap().is_balanced());
}

#[test]
fn scenario_c_cancelling_a_pending_order_nets_to_zero() {
    let office = BackOffice::default();
    let sp = SalesPointId::new();
    let product = stocked(&office, sp, 20);
    let buyer = customer();

    let placed = office
        .orders()
        .create_order(PlaceOrder::new(
            buyer.clone(),
            vec![CartLine::immediate(product, 2)],
            PaymentMethod::Cash,
        ))
        .unwrap();
    office.orders().cancel(&buyer, placed.order.id_typed()).unwrap();

    assert_eq!(levels(&office, product, sp), (20, 0));
    let order_moves: Vec<(i64, i64)> = office
        .ledger()
        .movements(product, sp)
        .unwrap()
        .iter()
        .skip(1)
        .map(|m| (m.change, m.reserved_change))
        .collect();
    assert_eq!(order_moves, vec![(0, 2), (0, -2)]);
}

#[test]
fn scenario_d_and_e_invoice_receipt_and_return() {
    let office = BackOffice::default();
    let sp = SalesPointId::new();
    let product = widget(&office);
    let clerk = admin();

    // D
    let invoice = office
        .invoices()
        .create_invoice(&clerk, NewInvoice::new("Acme", sp).with_item(product, 10, 900))
        .unwrap();
    assert_eq!(invoice.total_cost(), 9_000);

    let processed = office.invoices().process(&clerk, invoice.id_typed()).unwrap();
    assert_eq!(levels(&office, product, sp), (10, 0));
    let moves = office.ledger().movements(product, sp).unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!((moves[0].change, moves[0].reason.as_str()), (10, "invoice receipt"));
    assert_eq!(processed.movements, moves);

    let err = office.invoices().process(&clerk, invoice.id_typed()).unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition { .. }));
    assert_eq!(levels(&office, product, sp), (10, 0));

    // E
    let request = |quantity| ReturnRequest {
        invoice_id: invoice.id_typed(),
        product,
        quantity,
        reason: "wrong colour".to_string(),
    };
    office.invoices().record_return(&clerk, request(3)).unwrap();
    assert_eq!(levels(&office, product, sp), (7, 0));

    let err = office.invoices().record_return(&clerk, request(8)).unwrap_err();
    assert!(matches!(err, DomainError::InvalidQuantity { quantity: 8, .. }));
    assert_eq!(levels(&office, product, sp), (7, 0));
    assert_eq!(office.invoices().invoice(invoice.id_typed()).unwrap().returnable(product), 7);
}

#[test]
fn scenario_f_shortfall_mutates_nothing() {
    let office = BackOffice::default();
    let north = SalesPointId::new();
    let south = SalesPointId::new();
    let product = stocked(&office, north, 12);
    office.ledger().receive(product, south, 8, "opening balance").unwrap();

    let rows_before = office.ledger().snapshot().unwrap();
    let movements_before = office.ledger().movement_count().unwrap();

    let err = office.orders().create_order(order(product, 25)).unwrap_err();

    assert_eq!(err, DomainError::insufficient_stock(product, None, 25, 20));
    assert!(office.orders().store().is_empty().unwrap());
    assert_eq!(office.ledger().snapshot().unwrap(), rows_before);
    assert_eq!(office.ledger().movement_count().unwrap(), movements_before);
}

#[test]
fn orders_split_across_sales_points() {
    let office = BackOffice::default();
    let north = SalesPointId::new();
    let south = SalesPointId::new();
    let product = stocked(&office, north, 4);
    office.ledger().receive(product, south, 10, "opening balance").unwrap();

    let placed = office.orders().create_order(order(product, 7)).unwrap();
    assert_eq!(placed.order.total_price(), 7_000);
    assert_eq!(levels(&office, product, north), (4, 4));
    assert_eq!(levels(&office, product, south), (10, 3));

    office
        .orders()
        .record_payment_outcome(placed.order.id_typed(), PaymentOutcome::Approved)
        .unwrap();
    office
        .orders()
        .transition(&admin(), placed.order.id_typed(), OrderStatus::Enviado)
        .unwrap();
    assert_eq!(levels(&office, product, north), (0, 0));
    assert_eq!(levels(&office, product, south), (7, 0));
}

#[test]
fn concurrent_orders_never_oversell() {
    let office = Arc::new(BackOffice::default());
    let sp = SalesPointId::new();
    let product = stocked(&office, sp, 20);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let office = Arc::clone(&office);
            thread::spawn(move || office.orders().create_order(order(product, 3)).is_ok())
        })
        .collect();
    let placed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(placed, 6);
    assert_eq!(levels(&office, product, sp), (20, 18));
    assert_eq!(office.orders().store().len().unwrap(), 6);
    assert!(office.ledger().reconcile(product, sp).unwrap().is_balanced());
}

#[test]
fn invoice_returns_race_orders_without_lost_updates() {
    let office = Arc::new(BackOffice::default());
    let sp = SalesPointId::new();
    let product = widget(&office);
    let clerk = admin();

    let invoice = office
        .invoices()
        .create_invoice(&clerk, NewInvoice::new("Acme", sp).with_item(product, 30, 100))
        .unwrap();
    office.invoices().process(&clerk, invoice.id_typed()).unwrap();

    let buyers: Vec<_> = (0..5)
        .map(|_| {
            let office = Arc::clone(&office);
            thread::spawn(move || office.orders().create_order(order(product, 2)).is_ok())
        })
        .collect();
    let returns: Vec<_> = (0..5)
        .map(|_| {
            let office = Arc::clone(&office);
            let clerk = clerk.clone();
            let invoice_id = invoice.id_typed();
            thread::spawn(move || {
                office
                    .invoices()
                    .record_return(
                        &clerk,
                        ReturnRequest {
                            invoice_id,
                            product,
                            quantity: 1,
                            reason: "damaged".to_string(),
                        },
                    )
                    .is_ok()
            })
        })
        .collect();

    let ordered = buyers.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count() as i64;
    let returned = returns.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count() as i64;

    assert_eq!((ordered, returned), (5, 5));
    assert_eq!(levels(&office, product, sp), (25, 10));
    assert!(office.ledger().reconcile(product, sp).unwrap().is_balanced());
}

#[test]
fn staff_and_customer_are_notified() {
    let office = BackOffice::default();
    let sales_point = SalesPoint::new("Downtown");
    let sp = sales_point.id;
    office.sales_points().register(sales_point).unwrap();
    office
        .sales_points()
        .assign_administrator(sp, UserId::new(), "boss@example.com")
        .unwrap();
    office
        .sales_points()
        .assign_seller(sp, UserId::new(), "clerk@example.com")
        .unwrap();
    let product = stocked(&office, sp, 10);

    let Some(notifier) = office.notifications() else {
        panic!("notifications are on by default");
    };
    let inbox = stockroom_events::EventBus::subscribe(notifier.bus());

    let placed = office.orders().create_order(order(product, 1)).unwrap();
    let id = placed.order.id_typed();
    office.orders().transition(&admin(), id, OrderStatus::Cancelado).unwrap();

    let received = inbox.drain();
    assert_eq!(
        received,
        vec![
            Notification::NewOrder {
                order_id: id,
                sales_point: sp,
                staff_emails: vec!["boss@example.com".to_string(), "clerk@example.com".to_string()],
            },
            Notification::StatusChanged {
                user_email: "buyer@example.com".to_string(),
                order_id: id,
                status: OrderStatus::Cancelado,
            },
        ]
    );

    let wire = serde_json::to_value(&received[1]).unwrap();
    assert_eq!(wire["kind"], "status_changed");
    assert_eq!(wire["status"], "cancelado");
}

#[test]
fn disabled_notifications_still_place_orders() {
    let office = BackOffice::new(BackOfficeConfig {
        notifications: false,
        ..BackOfficeConfig::default()
    });
    let sp = SalesPointId::new();
    let product = stocked(&office, sp, 5);

    assert!(office.notifications().is_none());
    office.orders().create_order(order(product, 2)).unwrap();
    assert_eq!(levels(&office, product, sp), (5, 2));
}

#[test]
fn configured_threshold_and_prefix_apply() {
    let office = BackOffice::new(BackOfficeConfig {
        low_stock_threshold: 10,
        invoice_prefix: "FAC".to_string(),
        ..BackOfficeConfig::default()
    });
    let sp = SalesPointId::new();
    let product = stocked(&office, sp, 12);

    let placed = office.orders().create_order(order(product, 1)).unwrap();
    office
        .orders()
        .transition(&admin(), placed.order.id_typed(), OrderStatus::Enviado)
        .unwrap_err();
    office
        .orders()
        .record_payment_outcome(placed.order.id_typed(), PaymentOutcome::Approved)
        .unwrap();
    let shipped = office
        .orders()
        .transition(&admin(), placed.order.id_typed(), OrderStatus::Enviado)
        .unwrap();
    assert!(shipped.low_stock.is_empty());

    let invoice = office
        .invoices()
        .create_invoice(&admin(), NewInvoice::new("Acme", sp).with_item(product, 1, 1))
        .unwrap();
    assert!(invoice.invoice_number().starts_with("FAC-"));

    let second = office.orders().create_order(order(product, 1)).unwrap();
    office
        .orders()
        .record_payment_outcome(second.order.id_typed(), PaymentOutcome::Approved)
        .unwrap();
    let shipped = office
        .orders()
        .transition(&admin(), second.order.id_typed(), OrderStatus::Enviado)
        .unwrap();
    assert_eq!(shipped.low_stock.len(), 1);
    assert_eq!(shipped.low_stock[0].threshold, 10);
}

#[test]
fn return_deletion_is_blocked_once_the_product_sells() {
    let office = BackOffice::default();
    let sp = SalesPointId::new();
    let product = widget(&office);
    let clerk = admin();

    let invoice = office
        .invoices()
        .create_invoice(&clerk, NewInvoice::new("Acme", sp).with_item(product, 10, 100))
        .unwrap();
    office.invoices().process(&clerk, invoice.id_typed()).unwrap();
    let recorded = office
        .invoices()
        .record_return(
            &clerk,
            ReturnRequest {
                invoice_id: invoice.id_typed(),
                product,
                quantity: 2,
                reason: "damaged".to_string(),
            },
        )
        .unwrap();
    let return_id = recorded.invoice.returns()[0].id;

    office.orders().create_order(order(product, 1)).unwrap();

    let err = office.invoices().delete_return(&clerk, return_id).unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    assert_eq!(levels(&office, product, sp), (8, 1));

    let voided = office
        .invoices()
        .revert(&clerk, invoice.id_typed(), InvoiceStatus::Anulada)
        .unwrap_err();
    assert!(voided.is_insufficient_stock());
}
