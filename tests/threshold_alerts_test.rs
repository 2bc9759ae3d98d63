mod common;

use common::setup;
use inventory_core::events::Event;
use inventory_core::models::{AlertSeverity, AlertStatus, StockAlertType};
use inventory_core::services::transactions::NewTransaction;
use rust_decimal_macros::dec;

/// Walks the documented alerting scenario: minimum stock 10, reorder
/// point 20, starting from 50 on hand.
#[tokio::test]
async fn issues_walk_stock_through_reorder_and_low_stock_alerts() {
    let mut ctx = setup();
    let product = ctx.register_product("ALERT-1", dec!(10), dec!(20));
    let warehouse = ctx.register_warehouse("WH-ALERT");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(50),
            "seed",
        ))
        .await
        .expect("seed receipt");
    assert!(
        ctx.core.open_alerts(Some(product.id), None).is_empty(),
        "healthy stock raises nothing"
    );

    // 50 - 35 = 15: at or below reorder point 20, still above minimum 10.
    ctx.core
        .process_transaction(NewTransaction::issue(
            product.id,
            warehouse.id,
            dec!(35),
            "order",
        ))
        .await
        .expect("first issue");

    let open = ctx.core.open_alerts(Some(product.id), Some(warehouse.id));
    assert_eq!(open.len(), 1);
    let first = &open[0];
    assert_eq!(first.alert_type, StockAlertType::BelowReorderPoint);
    assert_eq!(first.severity, AlertSeverity::Medium);
    assert_eq!(first.status, AlertStatus::New);

    let events = ctx.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::ProductReorderPointReached { .. })),
        "reorder breach publishes the replenishment notification"
    );

    // 15 - 10 = 5: below minimum 10; the open alert escalates in place.
    ctx.core
        .process_transaction(NewTransaction::issue(
            product.id,
            warehouse.id,
            dec!(10),
            "order",
        ))
        .await
        .expect("second issue");

    let open = ctx.core.open_alerts(Some(product.id), Some(warehouse.id));
    assert_eq!(open.len(), 1, "no duplicate alert for the pair");
    let escalated = &open[0];
    assert_eq!(escalated.id, first.id);
    assert_eq!(escalated.alert_type, StockAlertType::LowStock);
    assert_eq!(escalated.severity, AlertSeverity::High);
    assert_eq!(escalated.current_quantity, dec!(5));
}

#[tokio::test]
async fn replenishment_auto_resolves_open_alert() {
    let ctx = setup();
    let product = ctx.register_product("ALERT-2", dec!(10), dec!(20));
    let warehouse = ctx.register_warehouse("WH-RECOV");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(5),
            "seed",
        ))
        .await
        .expect("seed receipt");
    let alert_id = ctx.core.open_alerts(Some(product.id), None)[0].id;

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(100),
            "replenish",
        ))
        .await
        .expect("replenishment");

    assert!(ctx.core.open_alerts(Some(product.id), None).is_empty());
    let resolved = ctx.core.alerts.alert(alert_id).unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("system"));
}

#[tokio::test]
async fn repeated_breaches_update_the_open_alert() {
    let ctx = setup();
    let product = ctx.register_product("ALERT-3", dec!(10), dec!(20));
    let warehouse = ctx.register_warehouse("WH-RPT");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(18),
            "seed",
        ))
        .await
        .expect("seed receipt");
    let first = ctx.core.open_alerts(Some(product.id), None);
    assert_eq!(first.len(), 1);

    ctx.core
        .process_transaction(NewTransaction::issue(
            product.id,
            warehouse.id,
            dec!(2),
            "order",
        ))
        .await
        .expect("issue");

    let open = ctx.core.open_alerts(Some(product.id), None);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, first[0].id);
    assert_eq!(open[0].current_quantity, dec!(16));
}

#[tokio::test]
async fn stock_take_recount_drives_alerting() {
    let ctx = setup();
    let product = ctx.register_product("ALERT-4", dec!(10), dec!(20));
    let warehouse = ctx.register_warehouse("WH-CNT");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(40),
            "seed",
        ))
        .await
        .expect("seed receipt");

    // Physical count found only 7 units.
    let txn = ctx
        .core
        .process_transaction(NewTransaction::stock_take(
            product.id,
            warehouse.id,
            dec!(7),
            "counter",
        ))
        .await
        .expect("stock take");
    assert_eq!(txn.quantity, dec!(-33));

    let open = ctx.core.open_alerts(Some(product.id), None);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, StockAlertType::LowStock);
}
