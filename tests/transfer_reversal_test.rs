mod common;

use assert_matches::assert_matches;
use common::setup;
use inventory_core::errors::InventoryError;
use inventory_core::models::TransactionType;
use inventory_core::services::reservations::ReserveRequest;
use inventory_core::services::transactions::NewTransaction;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn transfer_moves_stock_and_links_both_legs() {
    let ctx = setup();
    let product = ctx.register_product("TRF-1", dec!(0), dec!(0));
    let wh_a = ctx.register_warehouse("WH-TA");
    let wh_b = ctx.register_warehouse("WH-TB");

    ctx.core
        .process_transaction(NewTransaction::receipt(product.id, wh_a.id, dec!(30), "seed"))
        .await
        .expect("seed receipt");

    let issue_leg = ctx
        .core
        .process_transaction(NewTransaction::transfer(
            product.id,
            wh_a.id,
            wh_b.id,
            dec!(20),
            "rebalance",
        ))
        .await
        .expect("transfer");

    assert_eq!(ctx.core.stock_level(product.id, wh_a.id).quantity_on_hand, dec!(10));
    assert_eq!(ctx.core.stock_level(product.id, wh_b.id).quantity_on_hand, dec!(20));

    assert_eq!(issue_leg.transaction_type, TransactionType::Transfer);
    assert_eq!(issue_leg.quantity, dec!(-20));
    assert_eq!(issue_leg.source_warehouse_id, Some(wh_a.id));
    assert_eq!(issue_leg.destination_warehouse_id, Some(wh_b.id));

    let receipt_leg = ctx
        .core
        .transaction(issue_leg.transfer_pair_id.expect("pair link"))
        .expect("receipt leg recorded");
    assert_eq!(receipt_leg.quantity, dec!(20));
    assert_eq!(receipt_leg.warehouse_id, wh_b.id);
    assert_eq!(receipt_leg.transfer_pair_id, Some(issue_leg.id));
}

#[tokio::test]
async fn transfer_beyond_available_fails_without_partial_state() {
    let ctx = setup();
    let product = ctx.register_product("TRF-2", dec!(0), dec!(0));
    let wh_a = ctx.register_warehouse("WH-TC");
    let wh_b = ctx.register_warehouse("WH-TD");

    ctx.core
        .process_transaction(NewTransaction::receipt(product.id, wh_a.id, dec!(5), "seed"))
        .await
        .expect("seed receipt");

    let err = ctx
        .core
        .process_transaction(NewTransaction::transfer(
            product.id,
            wh_a.id,
            wh_b.id,
            dec!(8),
            "rebalance",
        ))
        .await
        .unwrap_err();
    assert_matches!(err, InventoryError::InsufficientStock { .. });

    assert_eq!(ctx.core.stock_level(product.id, wh_a.id).quantity_on_hand, dec!(5));
    assert_eq!(ctx.core.stock_level(product.id, wh_b.id).quantity_on_hand, dec!(0));
}

#[tokio::test]
async fn transfer_to_same_warehouse_is_rejected() {
    let ctx = setup();
    let product = ctx.register_product("TRF-3", dec!(0), dec!(0));
    let wh = ctx.register_warehouse("WH-TE");

    let err = ctx
        .core
        .process_transaction(NewTransaction::transfer(
            product.id,
            wh.id,
            wh.id,
            dec!(1),
            "noop",
        ))
        .await
        .unwrap_err();
    assert_matches!(err, InventoryError::InvalidStockOperation(_));
}

#[tokio::test]
async fn reversal_restores_the_ledger_exactly() {
    let ctx = setup();
    let product = ctx.register_product("REV-1", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-REV");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(50),
            "seed",
        ))
        .await
        .expect("seed receipt");
    let before = ctx.core.stock_level(product.id, warehouse.id);

    let issue = ctx
        .core
        .process_transaction(NewTransaction::issue(
            product.id,
            warehouse.id,
            dec!(12),
            "order",
        ))
        .await
        .expect("issue");

    let reversal = ctx
        .core
        .reverse_transaction(issue.id, "supervisor")
        .await
        .expect("reversal");

    let after = ctx.core.stock_level(product.id, warehouse.id);
    assert_eq!(after.quantity_on_hand, before.quantity_on_hand);
    assert_eq!(after.quantity_reserved, before.quantity_reserved);

    assert_eq!(reversal.quantity, dec!(12));
    assert_eq!(reversal.reverses_transaction_id, Some(issue.id));
    let original = ctx.core.transaction(issue.id).unwrap();
    assert!(original.is_reversed);
    assert_eq!(original.reversed_by_transaction_id, Some(reversal.id));
}

#[tokio::test]
async fn second_reversal_attempt_fails() {
    let ctx = setup();
    let product = ctx.register_product("REV-2", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-REV2");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(10),
            "seed",
        ))
        .await
        .expect("seed receipt");
    let issue = ctx
        .core
        .process_transaction(NewTransaction::issue(product.id, warehouse.id, dec!(4), "order"))
        .await
        .expect("issue");

    let reversal = ctx
        .core
        .reverse_transaction(issue.id, "supervisor")
        .await
        .expect("first reversal");

    assert_matches!(
        ctx.core.reverse_transaction(issue.id, "supervisor").await,
        Err(InventoryError::InvalidStockOperation(_))
    );
    // A reversal record itself cannot be reversed either.
    assert_matches!(
        ctx.core.reverse_transaction(reversal.id, "supervisor").await,
        Err(InventoryError::InvalidStockOperation(_))
    );
}

#[tokio::test]
async fn reversing_a_receipt_requires_the_stock_to_still_be_there() {
    let ctx = setup();
    let product = ctx.register_product("REV-3", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-REV3");

    let receipt = ctx
        .core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(10),
            "seed",
        ))
        .await
        .expect("receipt");
    ctx.core
        .process_transaction(NewTransaction::issue(product.id, warehouse.id, dec!(8), "order"))
        .await
        .expect("issue");

    // Only 2 on hand; undoing the 10-unit receipt would go negative.
    let err = ctx
        .core
        .reverse_transaction(receipt.id, "supervisor")
        .await
        .unwrap_err();
    assert_matches!(err, InventoryError::InsufficientStock { .. });
}

#[tokio::test]
async fn reversing_a_transfer_leg_reverses_the_whole_pair() {
    let ctx = setup();
    let product = ctx.register_product("REV-4", dec!(0), dec!(0));
    let wh_a = ctx.register_warehouse("WH-RT1");
    let wh_b = ctx.register_warehouse("WH-RT2");

    ctx.core
        .process_transaction(NewTransaction::receipt(product.id, wh_a.id, dec!(30), "seed"))
        .await
        .expect("seed receipt");
    let issue_leg = ctx
        .core
        .process_transaction(NewTransaction::transfer(
            product.id,
            wh_a.id,
            wh_b.id,
            dec!(20),
            "rebalance",
        ))
        .await
        .expect("transfer");

    ctx.core
        .reverse_transaction(issue_leg.id, "supervisor")
        .await
        .expect("transfer reversal");

    assert_eq!(ctx.core.stock_level(product.id, wh_a.id).quantity_on_hand, dec!(30));
    assert_eq!(ctx.core.stock_level(product.id, wh_b.id).quantity_on_hand, dec!(0));

    let receipt_leg = ctx
        .core
        .transaction(issue_leg.transfer_pair_id.unwrap())
        .unwrap();
    assert!(receipt_leg.is_reversed, "both legs are reversed together");
}

#[tokio::test]
async fn reversing_a_consuming_issue_restores_the_reservation() {
    let ctx = setup();
    let product = ctx.register_product("REV-5", dec!(0), dec!(0));
    let warehouse = ctx.register_warehouse("WH-REV5");

    ctx.core
        .process_transaction(NewTransaction::receipt(
            product.id,
            warehouse.id,
            dec!(10),
            "seed",
        ))
        .await
        .expect("seed receipt");
    let reservation = ctx
        .core
        .reserve(ReserveRequest {
            product_id: product.id,
            warehouse_id: warehouse.id,
            quantity: dec!(6),
            reference_id: Uuid::new_v4(),
            reference_type: "SALES_ORDER".into(),
            requested_by: "tests".into(),
        })
        .await
        .expect("reserve");

    let issue = ctx
        .core
        .consume_reservation(reservation.id, "picker")
        .await
        .expect("consume");
    let level = ctx.core.stock_level(product.id, warehouse.id);
    assert_eq!(level.quantity_on_hand, dec!(4));
    assert_eq!(level.quantity_reserved, dec!(0));

    ctx.core
        .reverse_transaction(issue.id, "supervisor")
        .await
        .expect("reversal");

    let level = ctx.core.stock_level(product.id, warehouse.id);
    assert_eq!(level.quantity_on_hand, dec!(10));
    assert_eq!(level.quantity_reserved, dec!(6));
    let restored = ctx.core.reservation(reservation.id).unwrap();
    assert_eq!(
        restored.status,
        inventory_core::models::ReservationStatus::Active
    );
    ctx.core
        .verify_reserved_totals()
        .expect("reserved totals consistent after reversal");
}
