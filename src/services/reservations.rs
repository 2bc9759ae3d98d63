use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::catalog::CatalogProvider;
use crate::errors::InventoryError;
use crate::events::{EventBatch, Outbox};
use crate::ledger::QuantityLedger;
use crate::models::{Reservation, ReservationStatus, StockTransaction, TransactionType};
use crate::services::alerts::ThresholdMonitor;
use crate::services::transactions::{NewTransaction, TransactionProcessor};
use crate::sync::{PairLockManager, StockKey};

lazy_static! {
    static ref RESERVATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_reservations_total",
            "Total number of reservation operations"
        ),
        &["operation"]
    )
    .expect("metric can be created");
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must be positive"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReserveRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    /// Owning reference, e.g. a sales order id.
    pub reference_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub reference_type: String,
    #[validate(length(min = 1, max = 100))]
    pub requested_by: String,
}

/// Reservation rows, shared between the manager and the transaction
/// processor (which consumes reservations for issue transactions).
/// Status changes happen under the owning pair's lock.
pub struct ReservationStore {
    rows: DashMap<Uuid, Reservation>,
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn get(&self, reservation_id: Uuid) -> Option<Reservation> {
        self.rows.get(&reservation_id).map(|r| r.clone())
    }

    pub(crate) fn insert(&self, reservation: Reservation) {
        self.rows.insert(reservation.id, reservation);
    }

    pub(crate) fn mark_released(&self, reservation_id: Uuid) -> Result<Reservation, InventoryError> {
        let mut row = self
            .rows
            .get_mut(&reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
        if row.status != ReservationStatus::Active {
            return Err(InventoryError::invalid_op(format!(
                "reservation {} is {}",
                reservation_id,
                row.status.as_str()
            )));
        }
        row.status = ReservationStatus::Released;
        row.released_at = Some(Utc::now());
        Ok(row.clone())
    }

    pub(crate) fn mark_consumed(
        &self,
        reservation_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Reservation, InventoryError> {
        let mut row = self
            .rows
            .get_mut(&reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
        if row.status != ReservationStatus::Active {
            return Err(InventoryError::invalid_op(format!(
                "reservation {} is {}",
                reservation_id,
                row.status.as_str()
            )));
        }
        row.status = ReservationStatus::Consumed;
        row.released_at = Some(Utc::now());
        row.consumed_by_transaction_id = Some(transaction_id);
        Ok(row.clone())
    }

    /// Returns a consumed reservation to Active; used when the consuming
    /// issue is reversed.
    pub(crate) fn reactivate(&self, reservation_id: Uuid) -> Result<Reservation, InventoryError> {
        let mut row = self
            .rows
            .get_mut(&reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
        if row.status != ReservationStatus::Consumed {
            return Err(InventoryError::integrity(format!(
                "reservation {} cannot be reactivated from status {}",
                reservation_id,
                row.status.as_str()
            )));
        }
        row.status = ReservationStatus::Active;
        row.released_at = None;
        row.consumed_by_transaction_id = None;
        Ok(row.clone())
    }

    /// Sum of Active reservation quantities for one pair.
    pub fn active_total(&self, product_id: Uuid, warehouse_id: Uuid) -> Decimal {
        self.rows
            .iter()
            .filter(|r| {
                r.product_id == product_id
                    && r.warehouse_id == warehouse_id
                    && r.status == ReservationStatus::Active
            })
            .map(|r| r.quantity)
            .sum()
    }

    pub fn by_reference(&self, reference_id: Uuid) -> Vec<Reservation> {
        self.rows
            .iter()
            .filter(|r| r.reference_id == reference_id)
            .map(|r| r.clone())
            .collect()
    }
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A mismatch between a ledger row's reserved quantity and the sum of its
/// active reservations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservedTotalMismatch {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub ledger_reserved: Decimal,
    pub reservations_total: Decimal,
}

/// Places, releases and consumes holds against available quantity.
///
/// A reservation moves quantity from available to reserved without
/// touching on-hand. Releasing returns it with no transaction record;
/// consuming delegates to the transaction processor, which issues the
/// held quantity and retires the reservation in one unit of work.
pub struct ReservationManager {
    catalog: Arc<dyn CatalogProvider>,
    ledger: Arc<QuantityLedger>,
    locks: Arc<PairLockManager>,
    store: Arc<ReservationStore>,
    processor: Arc<TransactionProcessor>,
    monitor: Arc<ThresholdMonitor>,
    outbox: Outbox,
}

impl ReservationManager {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        ledger: Arc<QuantityLedger>,
        locks: Arc<PairLockManager>,
        store: Arc<ReservationStore>,
        processor: Arc<TransactionProcessor>,
        monitor: Arc<ThresholdMonitor>,
        outbox: Outbox,
    ) -> Self {
        Self {
            catalog,
            ledger,
            locks,
            store,
            processor,
            monitor,
            outbox,
        }
    }

    pub fn reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        self.store.get(reservation_id)
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = %request.quantity))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, InventoryError> {
        request.validate()?;

        let product = self.catalog.product(request.product_id).await?;
        if !product.is_active {
            return Err(InventoryError::invalid_op(format!(
                "product {} is inactive",
                product.sku
            )));
        }
        let warehouse = self.catalog.warehouse(request.warehouse_id).await?;
        if !warehouse.is_active {
            return Err(InventoryError::invalid_op(format!(
                "warehouse {} is inactive",
                warehouse.code
            )));
        }

        let key = StockKey::new(request.product_id, request.warehouse_id);
        let guard = self.locks.acquire(key).await?;

        let level = self.ledger.level(request.product_id, request.warehouse_id);
        let available = level.quantity_available();
        if request.quantity > available {
            RESERVATIONS.with_label_values(&["rejected"]).inc();
            return Err(InventoryError::InsufficientStock {
                product_id: request.product_id,
                warehouse_id: request.warehouse_id,
                requested: request.quantity,
                available,
            });
        }

        let level = self.ledger.apply_delta(
            request.product_id,
            request.warehouse_id,
            Decimal::ZERO,
            request.quantity,
            None,
        )?;
        let reservation = Reservation {
            id: Uuid::new_v4(),
            product_id: request.product_id,
            warehouse_id: request.warehouse_id,
            quantity: request.quantity,
            reference_id: request.reference_id,
            reference_type: request.reference_type.clone(),
            status: ReservationStatus::Active,
            created_at: Utc::now(),
            created_by: request.requested_by.clone(),
            released_at: None,
            consumed_by_transaction_id: None,
        };
        self.store.insert(reservation.clone());

        // Holds shrink availability, which can cross the reorder point.
        let mut batch = EventBatch::new();
        self.monitor.evaluate(&product, &level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        RESERVATIONS.with_label_values(&["reserved"]).inc();
        info!(
            reservation_id = %reservation.id,
            reference_id = %reservation.reference_id,
            "Reservation placed"
        );
        Ok(reservation)
    }

    /// Returns the held quantity to available. Pure availability
    /// accounting: no ledger transaction is recorded.
    #[instrument(skip(self))]
    pub async fn release(&self, reservation_id: Uuid) -> Result<Reservation, InventoryError> {
        let row = self
            .store
            .get(reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

        let key = StockKey::new(row.product_id, row.warehouse_id);
        let guard = self.locks.acquire(key).await?;

        // Status may have changed while we waited for the lock.
        let row = self
            .store
            .get(reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
        if row.status != ReservationStatus::Active {
            return Err(InventoryError::invalid_op(format!(
                "reservation {} is {}",
                reservation_id,
                row.status.as_str()
            )));
        }

        let product = self.catalog.product(row.product_id).await?;
        let level = self.ledger.apply_delta(
            row.product_id,
            row.warehouse_id,
            Decimal::ZERO,
            -row.quantity,
            None,
        )?;
        let released = self.store.mark_released(reservation_id)?;

        let mut batch = EventBatch::new();
        self.monitor.evaluate(&product, &level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        RESERVATIONS.with_label_values(&["released"]).inc();
        info!(reservation_id = %reservation_id, "Reservation released");
        Ok(released)
    }

    /// Converts the hold into an issue transaction for the same quantity.
    /// The processor retires the reservation and applies both ledger
    /// movements under the pair lock, so double consumption cannot occur.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        reservation_id: Uuid,
        requested_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        let row = self
            .store
            .get(reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

        let request = NewTransaction {
            reservation_id: Some(reservation_id),
            reference_number: Some(row.reference_id.to_string()),
            reason: Some(format!("Consumed {} reservation", row.reference_type)),
            ..NewTransaction::new(
                TransactionType::Issue,
                row.product_id,
                row.warehouse_id,
                requested_by,
            )
        };
        let txn = self.processor.process(request).await?;
        RESERVATIONS.with_label_values(&["consumed"]).inc();
        Ok(txn)
    }

    /// Consistency probe: for every ledger row, the reserved quantity
    /// must equal the sum of that pair's active reservations.
    pub fn verify_reserved_totals(&self) -> Result<(), InventoryError> {
        let mismatches: Vec<ReservedTotalMismatch> = self
            .ledger
            .snapshot()
            .into_iter()
            .filter_map(|level| {
                let total = self
                    .store
                    .active_total(level.product_id, level.warehouse_id);
                if total != level.quantity_reserved {
                    Some(ReservedTotalMismatch {
                        product_id: level.product_id,
                        warehouse_id: level.warehouse_id,
                        ledger_reserved: level.quantity_reserved,
                        reservations_total: total,
                    })
                } else {
                    None
                }
            })
            .collect();

        if mismatches.is_empty() {
            return Ok(());
        }
        for m in &mismatches {
            error!(
                product_id = %m.product_id,
                warehouse_id = %m.warehouse_id,
                ledger_reserved = %m.ledger_reserved,
                reservations_total = %m.reservations_total,
                "Reserved total mismatch"
            );
        }
        Err(InventoryError::integrity(format!(
            "{} stock level(s) disagree with their active reservations",
            mismatches.len()
        )))
    }
}
