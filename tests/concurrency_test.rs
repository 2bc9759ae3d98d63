mod common;

use std::sync::Arc;

use common::setup;
use inventory_core::errors::InventoryError;
use inventory_core::services::reservations::ReserveRequest;
use inventory_core::services::transactions::NewTransaction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_never_oversell() {
    let ctx = setup();
    let product = ctx.register_product("CONC-1", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-CONC");

    let core = Arc::new(ctx.core);
    core.process_transaction(NewTransaction::receipt(
        product.id,
        warehouse.id,
        dec!(10),
        "seed",
    ))
    .await
    .expect("seed receipt");

    // 20 concurrent issues of 1 unit against 10 on hand.
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let core = core.clone();
        let (p, w) = (product.id, warehouse.id);
        tasks.push(tokio::spawn(async move {
            core.process_transaction(NewTransaction::issue(p, w, dec!(1), "load"))
                .await
        }));
    }

    let mut successes = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(InventoryError::InsufficientStock { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(successes, 10, "exactly the available quantity is issued");
    assert_eq!(insufficient, 10);
    let level = core.stock_level(product.id, warehouse.id);
    assert_eq!(level.quantity_on_hand, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_respect_availability() {
    let ctx = setup();
    let product = ctx.register_product("CONC-2", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-RSV");

    let core = Arc::new(ctx.core);
    core.process_transaction(NewTransaction::receipt(
        product.id,
        warehouse.id,
        dec!(10),
        "seed",
    ))
    .await
    .expect("seed receipt");

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let core = core.clone();
        let (p, w) = (product.id, warehouse.id);
        tasks.push(tokio::spawn(async move {
            core.reserve(ReserveRequest {
                product_id: p,
                warehouse_id: w,
                quantity: dec!(1),
                reference_id: Uuid::new_v4(),
                reference_type: "SALES_ORDER".into(),
                requested_by: "load".into(),
            })
            .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 10, "exactly 10 single-unit reservations succeed");
    let level = core.stock_level(product.id, warehouse.id);
    assert_eq!(level.quantity_reserved, dec!(10));
    assert_eq!(level.quantity_available(), Decimal::ZERO);
    core.verify_reserved_totals().expect("reserved totals consistent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_transfers_complete_without_deadlock() {
    let ctx = setup();
    let product = ctx.register_product("CONC-3", dec!(0), dec!(0));
    let wh_a = ctx.register_warehouse("WH-A");
    let wh_b = ctx.register_warehouse("WH-B");

    let core = Arc::new(ctx.core);
    for warehouse in [wh_a.id, wh_b.id] {
        core.process_transaction(NewTransaction::receipt(
            product.id,
            warehouse,
            dec!(100),
            "seed",
        ))
        .await
        .expect("seed receipt");
    }

    // Transfers in both directions at once; lock ordering must prevent
    // deadlock and the totals must balance.
    let mut tasks = Vec::new();
    for i in 0..40 {
        let core = core.clone();
        let (p, a, b) = (product.id, wh_a.id, wh_b.id);
        let (source, destination) = if i % 2 == 0 { (a, b) } else { (b, a) };
        tasks.push(tokio::spawn(async move {
            core.process_transaction(NewTransaction::transfer(
                p,
                source,
                destination,
                dec!(1),
                "shuffle",
            ))
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("transfer");
    }

    let total = core.stock_level(product.id, wh_a.id).quantity_on_hand
        + core.stock_level(product.id, wh_b.id).quantity_on_hand;
    assert_eq!(total, dec!(200), "transfers conserve total stock");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_consumption_is_impossible_under_race() {
    let ctx = setup();
    let product = ctx.register_product("CONC-4", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-DBL");

    let core = Arc::new(ctx.core);
    core.process_transaction(NewTransaction::receipt(
        product.id,
        warehouse.id,
        dec!(5),
        "seed",
    ))
    .await
    .expect("seed receipt");

    let reservation = core
        .reserve(ReserveRequest {
            product_id: product.id,
            warehouse_id: warehouse.id,
            quantity: dec!(5),
            reference_id: Uuid::new_v4(),
            reference_type: "SALES_ORDER".into(),
            requested_by: "tests".into(),
        })
        .await
        .expect("reserve");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let core = core.clone();
        let id = reservation.id;
        tasks.push(tokio::spawn(async move {
            core.consume_reservation(id, "racer").await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1, "a reservation is consumed exactly once");
    let level = core.stock_level(product.id, warehouse.id);
    assert_eq!(level.quantity_on_hand, Decimal::ZERO);
    assert_eq!(level.quantity_reserved, Decimal::ZERO);
    core.verify_reserved_totals().expect("reserved totals consistent");
}
