use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::catalog::CatalogProvider;
use crate::errors::InventoryError;
use crate::events::{Event, EventBatch, Outbox};
use crate::ledger::QuantityLedger;
use crate::models::{Product, Reservation, StockLevel, StockTransaction, TransactionType, Warehouse};
use crate::services::alerts::ThresholdMonitor;
use crate::services::numbering::NumberSequence;
use crate::services::reservations::ReservationStore;
use crate::sync::{PairLockManager, StockKey};

const NUMBER_ATTEMPTS: u32 = 5;

lazy_static! {
    static ref STOCK_TRANSACTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_transactions_total",
            "Total number of committed stock transactions"
        ),
        &["transaction_type"]
    )
    .expect("metric can be created");
    static ref STOCK_TRANSACTION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_transaction_failures_total",
            "Total number of rejected stock transactions"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    static ref STOCK_REVERSALS: IntCounter = IntCounter::new(
        "stock_reversals_total",
        "Total number of reversal transactions"
    )
    .expect("metric can be created");
}

fn error_label(err: &InventoryError) -> &'static str {
    match err {
        InventoryError::ProductNotFound(_)
        | InventoryError::WarehouseNotFound(_)
        | InventoryError::TransactionNotFound(_)
        | InventoryError::ReservationNotFound(_)
        | InventoryError::PurchaseOrderNotFound(_)
        | InventoryError::AlertNotFound(_) => "not_found",
        InventoryError::InsufficientStock { .. } => "insufficient_stock",
        InventoryError::InvalidStockOperation(_) => "invalid_operation",
        InventoryError::ValidationError(_) => "validation_error",
        InventoryError::DuplicateEntity { .. } => "duplicate",
        InventoryError::IntegrityViolation(_) => "integrity",
        InventoryError::LockTimeout { .. } => "lock_timeout",
        InventoryError::EventError(_) => "event_error",
    }
}

/// Request to record one stock movement.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewTransaction {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub transaction_type: TransactionType,
    /// Movement quantity: a positive magnitude for Receipt, Issue,
    /// Return, Damage and Transfer; a signed delta for Adjustment and
    /// StockTake. Optional only when `counted_quantity` (StockTake) or
    /// `reservation_id` (consuming Issue) determines it.
    pub quantity: Option<Decimal>,
    /// Absolute recount for StockTake; the delta is derived from the
    /// pair's on-hand quantity at processing time.
    pub counted_quantity: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    #[validate(length(max = 100))]
    pub reference_number: Option<String>,
    /// Transfer only; defaults to `warehouse_id`.
    pub source_warehouse_id: Option<Uuid>,
    /// Transfer only.
    pub destination_warehouse_id: Option<Uuid>,
    /// Active reservation an Issue consumes.
    pub reservation_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub created_by: String,
}

impl NewTransaction {
    pub fn new(
        transaction_type: TransactionType,
        product_id: Uuid,
        warehouse_id: Uuid,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            transaction_type,
            quantity: None,
            counted_quantity: None,
            unit_cost: None,
            reference_number: None,
            source_warehouse_id: None,
            destination_warehouse_id: None,
            reservation_id: None,
            reason: None,
            notes: None,
            created_by: created_by.into(),
        }
    }

    pub fn receipt(
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: Decimal,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::new(TransactionType::Receipt, product_id, warehouse_id, created_by)
        }
    }

    pub fn issue(
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: Decimal,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::new(TransactionType::Issue, product_id, warehouse_id, created_by)
        }
    }

    pub fn adjustment(
        product_id: Uuid,
        warehouse_id: Uuid,
        signed_quantity: Decimal,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            quantity: Some(signed_quantity),
            ..Self::new(TransactionType::Adjustment, product_id, warehouse_id, created_by)
        }
    }

    pub fn transfer(
        product_id: Uuid,
        source_warehouse_id: Uuid,
        destination_warehouse_id: Uuid,
        quantity: Decimal,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            quantity: Some(quantity),
            source_warehouse_id: Some(source_warehouse_id),
            destination_warehouse_id: Some(destination_warehouse_id),
            ..Self::new(
                TransactionType::Transfer,
                product_id,
                source_warehouse_id,
                created_by,
            )
        }
    }

    pub fn stock_take(
        product_id: Uuid,
        warehouse_id: Uuid,
        counted_quantity: Decimal,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            counted_quantity: Some(counted_quantity),
            ..Self::new(TransactionType::StockTake, product_id, warehouse_id, created_by)
        }
    }
}

/// Validates and applies stock transactions against the quantity ledger.
///
/// The processor is the only writer of ledger rows. The transaction log
/// is append-only: committed records are never edited or deleted, and the
/// sole sanctioned undo is `reverse`, which records a new transaction
/// with the inverted delta and links the pair bidirectionally.
pub struct TransactionProcessor {
    catalog: Arc<dyn CatalogProvider>,
    ledger: Arc<QuantityLedger>,
    locks: Arc<PairLockManager>,
    reservations: Arc<ReservationStore>,
    monitor: Arc<ThresholdMonitor>,
    outbox: Outbox,
    log: DashMap<Uuid, StockTransaction>,
    numbers: DashMap<String, Uuid>,
    sequence: NumberSequence,
}

impl TransactionProcessor {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        ledger: Arc<QuantityLedger>,
        locks: Arc<PairLockManager>,
        reservations: Arc<ReservationStore>,
        monitor: Arc<ThresholdMonitor>,
        outbox: Outbox,
        number_prefix: &str,
    ) -> Self {
        Self {
            catalog,
            ledger,
            locks,
            reservations,
            monitor,
            outbox,
            log: DashMap::new(),
            numbers: DashMap::new(),
            sequence: NumberSequence::new(number_prefix),
        }
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Option<StockTransaction> {
        self.log.get(&transaction_id).map(|t| t.clone())
    }

    pub fn find_by_number(&self, transaction_number: &str) -> Option<StockTransaction> {
        self.numbers
            .get(transaction_number)
            .and_then(|id| self.log.get(&id).map(|t| t.clone()))
    }

    /// Validates and applies one transaction as a single unit of work.
    #[instrument(skip(self, request), fields(transaction_type = ?request.transaction_type, product_id = %request.product_id))]
    pub async fn process(
        &self,
        request: NewTransaction,
    ) -> Result<StockTransaction, InventoryError> {
        let result = self.process_inner(request).await;
        match &result {
            Ok(txn) => {
                STOCK_TRANSACTIONS
                    .with_label_values(&[txn.transaction_type.as_str()])
                    .inc();
            }
            Err(e) => {
                STOCK_TRANSACTION_FAILURES
                    .with_label_values(&[error_label(e)])
                    .inc();
            }
        }
        result
    }

    async fn process_inner(
        &self,
        request: NewTransaction,
    ) -> Result<StockTransaction, InventoryError> {
        request.validate()?;
        match request.transaction_type {
            TransactionType::Transfer => self.process_transfer(request).await,
            _ => self.process_simple(request).await,
        }
    }

    async fn process_simple(
        &self,
        request: NewTransaction,
    ) -> Result<StockTransaction, InventoryError> {
        let product = self.active_product(request.product_id).await?;
        let _warehouse = self.active_warehouse(request.warehouse_id).await?;

        if request.source_warehouse_id.is_some() || request.destination_warehouse_id.is_some() {
            return Err(InventoryError::invalid_op(
                "source and destination warehouses apply to transfers only",
            ));
        }
        if request.reservation_id.is_some()
            && request.transaction_type != TransactionType::Issue
        {
            return Err(InventoryError::invalid_op(
                "only issue transactions can consume a reservation",
            ));
        }

        let key = StockKey::new(request.product_id, request.warehouse_id);
        let guard = self.locks.acquire(key).await?;
        let before = self.ledger.level(request.product_id, request.warehouse_id);

        let (delta, reserved_delta, consumed) =
            self.resolve_deltas(&request, &before)?;

        let id = Uuid::new_v4();
        let number = self.unique_number(id)?;
        let level = match self.ledger.apply_delta(
            request.product_id,
            request.warehouse_id,
            delta,
            reserved_delta,
            Some(id),
        ) {
            Ok(level) => level,
            Err(e) => {
                self.numbers.remove(&number);
                return Err(e);
            }
        };
        if let Some(reservation) = &consumed {
            if let Err(e) = self.reservations.mark_consumed(reservation.id, id) {
                // Pre-validated under the lock; undo the apply if it fails.
                let _ = self.ledger.apply_delta(
                    request.product_id,
                    request.warehouse_id,
                    -delta,
                    -reserved_delta,
                    None,
                );
                self.numbers.remove(&number);
                return Err(e);
            }
        }

        let txn = StockTransaction {
            id,
            transaction_number: number,
            product_id: request.product_id,
            warehouse_id: request.warehouse_id,
            transaction_type: request.transaction_type,
            quantity: delta,
            unit_cost: request.unit_cost,
            reference_number: request.reference_number.clone(),
            source_warehouse_id: None,
            destination_warehouse_id: None,
            transfer_pair_id: None,
            consumed_reservation_id: consumed.as_ref().map(|r| r.id),
            reason: request.reason.clone(),
            notes: request.notes.clone(),
            transaction_date: Utc::now(),
            created_at: Utc::now(),
            created_by: request.created_by.clone(),
            is_reversed: false,
            reversed_by_transaction_id: None,
            reverses_transaction_id: None,
        };
        self.log.insert(id, txn.clone());

        let mut batch = EventBatch::new();
        self.stage_committed(&txn, &before, &level, &mut batch);
        self.monitor.evaluate(&product, &level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        info!(
            transaction_id = %txn.id,
            transaction_number = %txn.transaction_number,
            quantity = %txn.quantity,
            on_hand = %level.quantity_on_hand,
            "Stock transaction committed"
        );
        Ok(txn)
    }

    async fn process_transfer(
        &self,
        request: NewTransaction,
    ) -> Result<StockTransaction, InventoryError> {
        let source_id = request.source_warehouse_id.unwrap_or(request.warehouse_id);
        if source_id != request.warehouse_id {
            return Err(InventoryError::invalid_op(
                "transfer source must match the transaction warehouse",
            ));
        }
        let destination_id = request.destination_warehouse_id.ok_or_else(|| {
            InventoryError::invalid_op("transfer requires a destination warehouse")
        })?;
        if source_id == destination_id {
            return Err(InventoryError::invalid_op(
                "transfer source and destination must differ",
            ));
        }
        if request.reservation_id.is_some() {
            return Err(InventoryError::invalid_op(
                "transfers cannot consume reservations",
            ));
        }
        let quantity = positive_quantity(&request)?;

        let product = self.active_product(request.product_id).await?;
        let _source = self.active_warehouse(source_id).await?;
        let _destination = self.active_warehouse(destination_id).await?;

        let keys = [
            StockKey::new(request.product_id, source_id),
            StockKey::new(request.product_id, destination_id),
        ];
        let guard = self.locks.acquire_many(&keys).await?;

        let before_source = self.ledger.level(request.product_id, source_id);
        let before_destination = self.ledger.level(request.product_id, destination_id);
        let available = before_source.quantity_available();
        if quantity > available {
            return Err(InventoryError::InsufficientStock {
                product_id: request.product_id,
                warehouse_id: source_id,
                requested: quantity,
                available,
            });
        }

        let issue_id = Uuid::new_v4();
        let receipt_id = Uuid::new_v4();
        let issue_number = self.unique_number(issue_id)?;
        let receipt_number = match self.unique_number(receipt_id) {
            Ok(n) => n,
            Err(e) => {
                self.numbers.remove(&issue_number);
                return Err(e);
            }
        };

        let source_level = match self.ledger.apply_delta(
            request.product_id,
            source_id,
            -quantity,
            Decimal::ZERO,
            Some(issue_id),
        ) {
            Ok(level) => level,
            Err(e) => {
                self.numbers.remove(&issue_number);
                self.numbers.remove(&receipt_number);
                return Err(e);
            }
        };
        let destination_level = match self.ledger.apply_delta(
            request.product_id,
            destination_id,
            quantity,
            Decimal::ZERO,
            Some(receipt_id),
        ) {
            Ok(level) => level,
            Err(e) => {
                // Restore the source row so the failed unit leaves no trace.
                let _ = self.ledger.apply_delta(
                    request.product_id,
                    source_id,
                    quantity,
                    Decimal::ZERO,
                    None,
                );
                self.numbers.remove(&issue_number);
                self.numbers.remove(&receipt_number);
                return Err(e);
            }
        };

        let shared = |id: Uuid, number: String, warehouse_id: Uuid, delta: Decimal, pair: Uuid| {
            StockTransaction {
                id,
                transaction_number: number,
                product_id: request.product_id,
                warehouse_id,
                transaction_type: TransactionType::Transfer,
                quantity: delta,
                unit_cost: request.unit_cost,
                reference_number: request.reference_number.clone(),
                source_warehouse_id: Some(source_id),
                destination_warehouse_id: Some(destination_id),
                transfer_pair_id: Some(pair),
                consumed_reservation_id: None,
                reason: request.reason.clone(),
                notes: request.notes.clone(),
                transaction_date: Utc::now(),
                created_at: Utc::now(),
                created_by: request.created_by.clone(),
                is_reversed: false,
                reversed_by_transaction_id: None,
                reverses_transaction_id: None,
            }
        };
        let issue = shared(issue_id, issue_number, source_id, -quantity, receipt_id);
        let receipt = shared(receipt_id, receipt_number, destination_id, quantity, issue_id);
        self.log.insert(issue_id, issue.clone());
        self.log.insert(receipt_id, receipt.clone());

        let mut batch = EventBatch::new();
        self.stage_committed(&issue, &before_source, &source_level, &mut batch);
        self.stage_committed(&receipt, &before_destination, &destination_level, &mut batch);
        self.monitor.evaluate(&product, &source_level, &mut batch);
        self.monitor.evaluate(&product, &destination_level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        info!(
            issue_id = %issue.id,
            receipt_id = %receipt.id,
            quantity = %quantity,
            source = %source_id,
            destination = %destination_id,
            "Transfer committed"
        );
        Ok(issue)
    }

    /// Applies several simple transactions as one unit of work: every
    /// request is validated against the ledger before anything is
    /// applied, and all pair locks are held across the whole batch.
    pub async fn process_batch(
        &self,
        requests: Vec<NewTransaction>,
    ) -> Result<Vec<StockTransaction>, InventoryError> {
        if requests.is_empty() {
            return Err(InventoryError::invalid_op("empty transaction batch"));
        }
        let mut products = Vec::with_capacity(requests.len());
        for request in &requests {
            request.validate()?;
            if request.transaction_type == TransactionType::Transfer
                || request.reservation_id.is_some()
            {
                return Err(InventoryError::invalid_op(
                    "batch processing accepts simple transactions only",
                ));
            }
            products.push(self.active_product(request.product_id).await?);
            self.active_warehouse(request.warehouse_id).await?;
        }

        let keys: Vec<StockKey> = requests
            .iter()
            .map(|r| StockKey::new(r.product_id, r.warehouse_id))
            .collect();
        let guard = self.locks.acquire_many(&keys).await?;

        // Dry-run against working copies so a late line cannot fail after
        // an early line has been applied.
        let mut working: HashMap<StockKey, StockLevel> = HashMap::new();
        for key in &keys {
            working
                .entry(*key)
                .or_insert_with(|| self.ledger.level(key.product_id, key.warehouse_id));
        }
        let mut deltas = Vec::with_capacity(requests.len());
        for request in &requests {
            let key = StockKey::new(request.product_id, request.warehouse_id);
            let level = working.get_mut(&key).expect("working set is pre-populated");
            let delta = required_delta(request, level)?;
            if delta < Decimal::ZERO {
                let available = level.quantity_available();
                if -delta > available {
                    return Err(InventoryError::InsufficientStock {
                        product_id: request.product_id,
                        warehouse_id: request.warehouse_id,
                        requested: -delta,
                        available,
                    });
                }
            }
            level.quantity_on_hand += delta;
            deltas.push(delta);
        }

        let mut ids = Vec::with_capacity(requests.len());
        let mut numbers = Vec::with_capacity(requests.len());
        for _ in &requests {
            let id = Uuid::new_v4();
            match self.unique_number(id) {
                Ok(number) => {
                    ids.push(id);
                    numbers.push(number);
                }
                Err(e) => {
                    for number in &numbers {
                        self.numbers.remove(number);
                    }
                    return Err(e);
                }
            }
        }

        let mut committed: Vec<StockTransaction> = Vec::with_capacity(requests.len());
        let mut batch = EventBatch::new();
        for (index, request) in requests.iter().enumerate() {
            let before = self.ledger.level(request.product_id, request.warehouse_id);
            let level = match self.ledger.apply_delta(
                request.product_id,
                request.warehouse_id,
                deltas[index],
                Decimal::ZERO,
                Some(ids[index]),
            ) {
                Ok(level) => level,
                Err(e) => {
                    // Unreachable after the dry run; undo anything applied
                    // so the failed batch leaves no trace.
                    for txn in committed.iter().rev() {
                        let _ = self.ledger.apply_delta(
                            txn.product_id,
                            txn.warehouse_id,
                            -txn.quantity,
                            Decimal::ZERO,
                            None,
                        );
                        self.log.remove(&txn.id);
                    }
                    for number in &numbers {
                        self.numbers.remove(number);
                    }
                    return Err(e);
                }
            };
            let txn = StockTransaction {
                id: ids[index],
                transaction_number: numbers[index].clone(),
                product_id: request.product_id,
                warehouse_id: request.warehouse_id,
                transaction_type: request.transaction_type,
                quantity: deltas[index],
                unit_cost: request.unit_cost,
                reference_number: request.reference_number.clone(),
                source_warehouse_id: None,
                destination_warehouse_id: None,
                transfer_pair_id: None,
                consumed_reservation_id: None,
                reason: request.reason.clone(),
                notes: request.notes.clone(),
                transaction_date: Utc::now(),
                created_at: Utc::now(),
                created_by: request.created_by.clone(),
                is_reversed: false,
                reversed_by_transaction_id: None,
                reverses_transaction_id: None,
            };
            self.log.insert(txn.id, txn.clone());
            self.stage_committed(&txn, &before, &level, &mut batch);
            self.monitor.evaluate(&products[index], &level, &mut batch);
            STOCK_TRANSACTIONS
                .with_label_values(&[txn.transaction_type.as_str()])
                .inc();
            committed.push(txn);
        }
        drop(guard);
        self.outbox.publish(batch).await;

        info!(lines = committed.len(), "Transaction batch committed");
        Ok(committed)
    }

    /// Records the inverse of a committed transaction and links the two
    /// records. A transaction can be reversed once; reversals themselves
    /// cannot be reversed. Reversing a transfer leg reverses both legs.
    #[instrument(skip(self))]
    pub async fn reverse(
        &self,
        transaction_id: Uuid,
        reversed_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        let result = self.reverse_inner(transaction_id, reversed_by).await;
        match &result {
            Ok(_) => STOCK_REVERSALS.inc(),
            Err(e) => {
                STOCK_TRANSACTION_FAILURES
                    .with_label_values(&[error_label(e)])
                    .inc();
            }
        }
        result
    }

    async fn reverse_inner(
        &self,
        transaction_id: Uuid,
        reversed_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        let original = self
            .transaction(transaction_id)
            .ok_or(InventoryError::TransactionNotFound(transaction_id))?;
        if original.is_reversal() {
            return Err(InventoryError::invalid_op(format!(
                "transaction {} is itself a reversal",
                original.transaction_number
            )));
        }
        if original.transfer_pair_id.is_some() {
            self.reverse_transfer(original, reversed_by).await
        } else {
            self.reverse_simple(original, reversed_by).await
        }
    }

    async fn reverse_simple(
        &self,
        original: StockTransaction,
        reversed_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        let product = self.catalog.product(original.product_id).await?;
        let key = StockKey::new(original.product_id, original.warehouse_id);
        let guard = self.locks.acquire(key).await?;

        // Re-read under the lock: a concurrent reversal may have won.
        let original = self
            .transaction(original.id)
            .ok_or(InventoryError::TransactionNotFound(original.id))?;
        if original.is_reversed {
            return Err(InventoryError::invalid_op(format!(
                "transaction {} is already reversed",
                original.transaction_number
            )));
        }

        let inverse = -original.quantity;
        let reserved_delta = if original.consumed_reservation_id.is_some() {
            // Undoing a consuming issue restores the hold as well.
            inverse
        } else {
            Decimal::ZERO
        };
        let before = self.ledger.level(original.product_id, original.warehouse_id);
        if inverse < Decimal::ZERO {
            let available = before.quantity_available();
            if -inverse > available {
                return Err(InventoryError::InsufficientStock {
                    product_id: original.product_id,
                    warehouse_id: original.warehouse_id,
                    requested: -inverse,
                    available,
                });
            }
        }

        let id = Uuid::new_v4();
        let number = self.unique_number(id)?;
        let level = match self.ledger.apply_delta(
            original.product_id,
            original.warehouse_id,
            inverse,
            reserved_delta,
            Some(id),
        ) {
            Ok(level) => level,
            Err(e) => {
                self.numbers.remove(&number);
                return Err(e);
            }
        };
        if let Some(reservation_id) = original.consumed_reservation_id {
            if let Err(e) = self.reservations.reactivate(reservation_id) {
                let _ = self.ledger.apply_delta(
                    original.product_id,
                    original.warehouse_id,
                    -inverse,
                    -reserved_delta,
                    None,
                );
                self.numbers.remove(&number);
                return Err(e);
            }
        }

        let reversal = self.build_reversal(&original, id, number, inverse, reversed_by);
        self.log.insert(id, reversal.clone());
        self.mark_reversed(original.id, id);

        let mut batch = EventBatch::new();
        self.stage_committed(&reversal, &before, &level, &mut batch);
        self.monitor.evaluate(&product, &level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        info!(
            reversal_id = %reversal.id,
            reverses = %original.transaction_number,
            "Reversal committed"
        );
        Ok(reversal)
    }

    async fn reverse_transfer(
        &self,
        original: StockTransaction,
        reversed_by: &str,
    ) -> Result<StockTransaction, InventoryError> {
        let partner_id = original
            .transfer_pair_id
            .ok_or_else(|| InventoryError::integrity("transfer leg without a pair link"))?;
        let partner = self
            .transaction(partner_id)
            .ok_or_else(|| InventoryError::integrity("transfer pair record is missing"))?;
        let product = self.catalog.product(original.product_id).await?;

        let keys = [
            StockKey::new(original.product_id, original.warehouse_id),
            StockKey::new(partner.product_id, partner.warehouse_id),
        ];
        let guard = self.locks.acquire_many(&keys).await?;

        let original = self
            .transaction(original.id)
            .ok_or(InventoryError::TransactionNotFound(original.id))?;
        let partner = self
            .transaction(partner_id)
            .ok_or(InventoryError::TransactionNotFound(partner_id))?;
        if original.is_reversed || partner.is_reversed {
            return Err(InventoryError::invalid_op(format!(
                "transfer {} is already reversed",
                original.transaction_number
            )));
        }

        // The inbound leg is undone by subtracting stock, which must not
        // exceed what is still available at that warehouse.
        for leg in [&original, &partner] {
            if leg.quantity > Decimal::ZERO {
                let level = self.ledger.level(leg.product_id, leg.warehouse_id);
                let available = level.quantity_available();
                if leg.quantity > available {
                    return Err(InventoryError::InsufficientStock {
                        product_id: leg.product_id,
                        warehouse_id: leg.warehouse_id,
                        requested: leg.quantity,
                        available,
                    });
                }
            }
        }

        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let first_number = self.unique_number(first_id)?;
        let second_number = match self.unique_number(second_id) {
            Ok(n) => n,
            Err(e) => {
                self.numbers.remove(&first_number);
                return Err(e);
            }
        };

        let before_first = self.ledger.level(original.product_id, original.warehouse_id);
        let before_second = self.ledger.level(partner.product_id, partner.warehouse_id);
        let first_level = match self.ledger.apply_delta(
            original.product_id,
            original.warehouse_id,
            -original.quantity,
            Decimal::ZERO,
            Some(first_id),
        ) {
            Ok(level) => level,
            Err(e) => {
                self.numbers.remove(&first_number);
                self.numbers.remove(&second_number);
                return Err(e);
            }
        };
        let second_level = match self.ledger.apply_delta(
            partner.product_id,
            partner.warehouse_id,
            -partner.quantity,
            Decimal::ZERO,
            Some(second_id),
        ) {
            Ok(level) => level,
            Err(e) => {
                let _ = self.ledger.apply_delta(
                    original.product_id,
                    original.warehouse_id,
                    original.quantity,
                    Decimal::ZERO,
                    None,
                );
                self.numbers.remove(&first_number);
                self.numbers.remove(&second_number);
                return Err(e);
            }
        };

        let mut first =
            self.build_reversal(&original, first_id, first_number, -original.quantity, reversed_by);
        let mut second =
            self.build_reversal(&partner, second_id, second_number, -partner.quantity, reversed_by);
        first.transfer_pair_id = Some(second_id);
        second.transfer_pair_id = Some(first_id);
        first.source_warehouse_id = original.source_warehouse_id;
        first.destination_warehouse_id = original.destination_warehouse_id;
        second.source_warehouse_id = partner.source_warehouse_id;
        second.destination_warehouse_id = partner.destination_warehouse_id;
        self.log.insert(first_id, first.clone());
        self.log.insert(second_id, second.clone());
        self.mark_reversed(original.id, first_id);
        self.mark_reversed(partner.id, second_id);

        let mut batch = EventBatch::new();
        self.stage_committed(&first, &before_first, &first_level, &mut batch);
        self.stage_committed(&second, &before_second, &second_level, &mut batch);
        self.monitor.evaluate(&product, &first_level, &mut batch);
        self.monitor.evaluate(&product, &second_level, &mut batch);
        drop(guard);
        self.outbox.publish(batch).await;

        info!(
            reversal_id = %first.id,
            pair_reversal_id = %second.id,
            reverses = %original.transaction_number,
            "Transfer reversal committed"
        );
        Ok(first)
    }

    fn build_reversal(
        &self,
        original: &StockTransaction,
        id: Uuid,
        number: String,
        inverse: Decimal,
        reversed_by: &str,
    ) -> StockTransaction {
        StockTransaction {
            id,
            transaction_number: number,
            product_id: original.product_id,
            warehouse_id: original.warehouse_id,
            transaction_type: original.transaction_type,
            quantity: inverse,
            unit_cost: original.unit_cost,
            reference_number: Some(original.transaction_number.clone()),
            source_warehouse_id: None,
            destination_warehouse_id: None,
            transfer_pair_id: None,
            consumed_reservation_id: None,
            reason: Some(format!("Reversal of {}", original.transaction_number)),
            notes: None,
            transaction_date: Utc::now(),
            created_at: Utc::now(),
            created_by: reversed_by.to_string(),
            is_reversed: false,
            reversed_by_transaction_id: None,
            reverses_transaction_id: Some(original.id),
        }
    }

    fn mark_reversed(&self, original_id: Uuid, reversal_id: Uuid) {
        if let Some(mut entry) = self.log.get_mut(&original_id) {
            entry.is_reversed = true;
            entry.reversed_by_transaction_id = Some(reversal_id);
        }
    }

    fn resolve_deltas(
        &self,
        request: &NewTransaction,
        before: &StockLevel,
    ) -> Result<(Decimal, Decimal, Option<Reservation>), InventoryError> {
        if let Some(reservation_id) = request.reservation_id {
            let reservation = self
                .reservations
                .get(reservation_id)
                .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
            if reservation.product_id != request.product_id
                || reservation.warehouse_id != request.warehouse_id
            {
                return Err(InventoryError::invalid_op(
                    "reservation belongs to a different product or warehouse",
                ));
            }
            if reservation.status.is_terminal() {
                return Err(InventoryError::invalid_op(format!(
                    "reservation {} is {}",
                    reservation.id,
                    reservation.status.as_str()
                )));
            }
            if let Some(quantity) = request.quantity {
                if quantity != reservation.quantity {
                    return Err(InventoryError::invalid_op(
                        "a consuming issue must take the reservation's full quantity",
                    ));
                }
            }
            let quantity = reservation.quantity;
            return Ok((-quantity, -quantity, Some(reservation)));
        }

        let delta = required_delta(request, before)?;
        if delta < Decimal::ZERO {
            let available = before.quantity_available();
            if -delta > available {
                return Err(InventoryError::InsufficientStock {
                    product_id: request.product_id,
                    warehouse_id: request.warehouse_id,
                    requested: -delta,
                    available,
                });
            }
        }
        Ok((delta, Decimal::ZERO, None))
    }

    fn stage_committed(
        &self,
        txn: &StockTransaction,
        before: &StockLevel,
        after: &StockLevel,
        batch: &mut EventBatch,
    ) {
        batch.stage(Event::StockTransactionCreated {
            transaction_id: txn.id,
            transaction_number: txn.transaction_number.clone(),
            transaction_type: txn.transaction_type,
            product_id: txn.product_id,
            warehouse_id: txn.warehouse_id,
            quantity: txn.quantity,
            unit_cost: txn.unit_cost,
            created_at: txn.created_at,
        });
        batch.stage(Event::StockLevelChanged {
            product_id: txn.product_id,
            warehouse_id: txn.warehouse_id,
            old_quantity: before.quantity_on_hand,
            new_quantity: after.quantity_on_hand,
            change_reason: txn
                .reason
                .clone()
                .unwrap_or_else(|| txn.transaction_type.as_str().to_string()),
            occurred_at: after.last_updated_at,
        });
    }

    fn unique_number(&self, transaction_id: Uuid) -> Result<String, InventoryError> {
        for _ in 0..NUMBER_ATTEMPTS {
            let candidate = self.sequence.next();
            match self.numbers.entry(candidate.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(transaction_id);
                    return Ok(candidate);
                }
            }
        }
        Err(InventoryError::DuplicateEntity {
            entity: "stock transaction",
            key: "transaction number space exhausted".to_string(),
        })
    }

    async fn active_product(&self, product_id: Uuid) -> Result<Product, InventoryError> {
        let product = self.catalog.product(product_id).await?;
        if !product.is_active {
            return Err(InventoryError::invalid_op(format!(
                "product {} is inactive",
                product.sku
            )));
        }
        Ok(product)
    }

    async fn active_warehouse(&self, warehouse_id: Uuid) -> Result<Warehouse, InventoryError> {
        let warehouse = self.catalog.warehouse(warehouse_id).await?;
        if !warehouse.is_active {
            return Err(InventoryError::invalid_op(format!(
                "warehouse {} is inactive",
                warehouse.code
            )));
        }
        Ok(warehouse)
    }
}

fn positive_quantity(request: &NewTransaction) -> Result<Decimal, InventoryError> {
    let quantity = request.quantity.ok_or_else(|| {
        InventoryError::invalid_op(format!(
            "{} requires a quantity",
            request.transaction_type.as_str()
        ))
    })?;
    if quantity <= Decimal::ZERO {
        return Err(InventoryError::invalid_op(format!(
            "{} quantity must be positive",
            request.transaction_type.as_str()
        )));
    }
    Ok(quantity)
}

fn required_delta(
    request: &NewTransaction,
    before: &StockLevel,
) -> Result<Decimal, InventoryError> {
    match request.transaction_type {
        TransactionType::Receipt | TransactionType::Return => positive_quantity(request),
        TransactionType::Issue | TransactionType::Damage => {
            positive_quantity(request).map(|q| -q)
        }
        TransactionType::Adjustment => {
            let quantity = request
                .quantity
                .ok_or_else(|| InventoryError::invalid_op("adjustment requires a quantity"))?;
            if quantity == Decimal::ZERO {
                return Err(InventoryError::invalid_op(
                    "adjustment quantity must not be zero",
                ));
            }
            Ok(quantity)
        }
        TransactionType::StockTake => {
            if let Some(counted) = request.counted_quantity {
                if counted < Decimal::ZERO {
                    return Err(InventoryError::invalid_op(
                        "counted quantity must not be negative",
                    ));
                }
                Ok(counted - before.quantity_on_hand)
            } else {
                let quantity = request.quantity.ok_or_else(|| {
                    InventoryError::invalid_op(
                        "stock take requires a counted quantity or a signed delta",
                    )
                })?;
                Ok(quantity)
            }
        }
        TransactionType::Transfer => Err(InventoryError::invalid_op(
            "transfers are processed as linked transaction pairs",
        )),
    }
}
