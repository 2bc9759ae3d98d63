//! Stock ledger and reservation engine.
//!
//! The crate maintains consistent on-hand/reserved/available quantities
//! per (product, warehouse) pair under concurrent updates, applies stock
//! transactions atomically and reversibly, enforces non-negative-stock
//! invariants, raises threshold alerts, and receives purchase orders as
//! all-or-nothing batches. Persistence, transport and authentication are
//! the embedding application's concern.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod models;
pub mod services;
pub mod sync;
pub mod telemetry;

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::catalog::{CatalogProvider, InMemoryCatalog};
use crate::config::CoreConfig;
use crate::errors::InventoryError;
use crate::events::{event_channel, Event, EventSender, Outbox};
use crate::ledger::QuantityLedger;
use crate::models::{PurchaseOrder, Reservation, StockAlert, StockLevel, StockTransaction};
use crate::services::receiving::{LineReceipt, NewPurchaseOrder, ReceivingResult};
use crate::services::reservations::ReserveRequest;
use crate::services::transactions::NewTransaction;
use crate::services::{
    ReceivingCoordinator, ReservationManager, ReservationStore, ThresholdMonitor,
    TransactionProcessor,
};
use crate::sync::PairLockManager;

/// Wires the core components and exposes the command/query surface.
///
/// Events are emitted on the returned receiver after each mutation
/// commits; the embedding application drains it (see
/// [`events::process_events`] for a logging drain).
pub struct InventoryCore {
    pub config: CoreConfig,
    pub catalog: Arc<dyn CatalogProvider>,
    pub ledger: Arc<QuantityLedger>,
    pub locks: Arc<PairLockManager>,
    pub transactions: Arc<TransactionProcessor>,
    pub reservations: Arc<ReservationManager>,
    pub alerts: Arc<ThresholdMonitor>,
    pub receiving: Arc<ReceivingCoordinator>,
    pub event_sender: EventSender,
}

impl InventoryCore {
    /// Builds a core over the given catalog.
    pub fn with_catalog(
        config: CoreConfig,
        catalog: Arc<dyn CatalogProvider>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (event_sender, event_rx) = event_channel(config.event_buffer_size);
        let outbox = Outbox::new(event_sender.clone(), config.outbox_max_retries);

        let ledger = Arc::new(QuantityLedger::new());
        let locks = Arc::new(PairLockManager::new(config.lock_timeout()));
        let monitor = Arc::new(ThresholdMonitor::new());
        let reservation_store = Arc::new(ReservationStore::new());

        let transactions = Arc::new(TransactionProcessor::new(
            catalog.clone(),
            ledger.clone(),
            locks.clone(),
            reservation_store.clone(),
            monitor.clone(),
            outbox.clone(),
            &config.transaction_number_prefix,
        ));
        let reservations = Arc::new(ReservationManager::new(
            catalog.clone(),
            ledger.clone(),
            locks.clone(),
            reservation_store,
            transactions.clone(),
            monitor.clone(),
            outbox.clone(),
        ));
        let receiving = Arc::new(ReceivingCoordinator::new(
            catalog.clone(),
            transactions.clone(),
            outbox,
            &config.order_number_prefix,
        ));

        (
            Self {
                config,
                catalog,
                ledger,
                locks,
                transactions,
                reservations,
                alerts: monitor,
                receiving,
                event_sender,
            },
            event_rx,
        )
    }

    /// Builds a core with its own in-memory catalog, returning the
    /// concrete catalog handle for product/warehouse registration.
    pub fn in_memory(
        config: CoreConfig,
    ) -> (Self, Arc<InMemoryCatalog>, mpsc::Receiver<Event>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let (core, event_rx) = Self::with_catalog(config, catalog.clone());
        (core, catalog, event_rx)
    }

    // Command interface

    pub async fn process_transaction(
        &self,
        request: NewTransaction,
    ) -> Result<StockTransaction, InventoryError> {
        self.transactions.process(request).await
    }

    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        reversed_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        self.transactions.reverse(transaction_id, reversed_by).await
    }

    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, InventoryError> {
        self.reservations.reserve(request).await
    }

    pub async fn release(&self, reservation_id: Uuid) -> Result<Reservation, InventoryError> {
        self.reservations.release(reservation_id).await
    }

    pub async fn consume_reservation(
        &self,
        reservation_id: Uuid,
        requested_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        self.reservations.consume(reservation_id, requested_by).await
    }

    pub async fn create_purchase_order(
        &self,
        request: NewPurchaseOrder,
    ) -> Result<PurchaseOrder, InventoryError> {
        self.receiving.create(request).await
    }

    pub async fn receive_purchase_order(
        &self,
        purchase_order_id: Uuid,
        lines: Vec<LineReceipt>,
        received_by: &str,
    ) -> Result<ReceivingResult, InventoryError> {
        self.receiving
            .receive(purchase_order_id, lines, received_by)
            .await
    }

    pub fn submit_purchase_order(
        &self,
        purchase_order_id: Uuid,
        user: &str,
    ) -> Result<PurchaseOrder, InventoryError> {
        self.receiving.submit(purchase_order_id, user)
    }

    pub fn confirm_purchase_order(
        &self,
        purchase_order_id: Uuid,
        user: &str,
    ) -> Result<PurchaseOrder, InventoryError> {
        self.receiving.confirm(purchase_order_id, user)
    }

    pub fn cancel_purchase_order(
        &self,
        purchase_order_id: Uuid,
        user: &str,
    ) -> Result<PurchaseOrder, InventoryError> {
        self.receiving.cancel(purchase_order_id, user)
    }

    pub fn close_purchase_order(
        &self,
        purchase_order_id: Uuid,
        user: &str,
    ) -> Result<PurchaseOrder, InventoryError> {
        self.receiving.close(purchase_order_id, user)
    }

    pub fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        user: &str,
    ) -> Result<StockAlert, InventoryError> {
        self.alerts.acknowledge(alert_id, user)
    }

    pub fn resolve_alert(
        &self,
        alert_id: Uuid,
        user: &str,
        notes: Option<String>,
    ) -> Result<StockAlert, InventoryError> {
        self.alerts.resolve(alert_id, user, notes)
    }

    pub fn ignore_alert(&self, alert_id: Uuid, user: &str) -> Result<StockAlert, InventoryError> {
        self.alerts.ignore(alert_id, user)
    }

    // Query interface

    pub fn stock_level(&self, product_id: Uuid, warehouse_id: Uuid) -> StockLevel {
        self.ledger.level(product_id, warehouse_id)
    }

    pub fn open_alerts(
        &self,
        product_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> Vec<StockAlert> {
        self.alerts.open_alerts(product_id, warehouse_id)
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Option<StockTransaction> {
        self.transactions.transaction(transaction_id)
    }

    pub fn reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        self.reservations.reservation(reservation_id)
    }

    pub fn purchase_order(&self, purchase_order_id: Uuid) -> Option<PurchaseOrder> {
        self.receiving.purchase_order(purchase_order_id)
    }

    /// Consistency probe over the reservation-sum invariant.
    pub fn verify_reserved_totals(&self) -> Result<(), InventoryError> {
        self.reservations.verify_reserved_totals()
    }
}
