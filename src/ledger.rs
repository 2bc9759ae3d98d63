use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::error;
use uuid::Uuid;

use crate::errors::InventoryError;
use crate::models::StockLevel;
use crate::sync::StockKey;

/// The single source of truth for on-hand and reserved quantities.
///
/// The ledger exclusively owns its `StockLevel` rows; the transaction
/// processor is the only writer and every other component reads through
/// it. Each `apply_delta` updates one row atomically; a partially
/// applied delta (on-hand moved, reserved not) is never observable.
///
/// The non-negativity checks here are a last-resort integrity guard.
/// Callers are required to validate against current state before
/// applying; a rejection from the ledger itself means a validation bug
/// upstream and is logged as a defect.
pub struct QuantityLedger {
    levels: DashMap<StockKey, StockLevel>,
}

impl QuantityLedger {
    pub fn new() -> Self {
        Self {
            levels: DashMap::new(),
        }
    }

    /// Returns the level for the pair, creating a zeroed row on first
    /// access.
    pub fn level(&self, product_id: Uuid, warehouse_id: Uuid) -> StockLevel {
        self.levels
            .entry(StockKey::new(product_id, warehouse_id))
            .or_insert_with(|| StockLevel::zeroed(product_id, warehouse_id))
            .clone()
    }

    /// Applies signed deltas to one row and returns the updated snapshot.
    ///
    /// `transaction_id` is recorded as the row's last transaction when
    /// present; reservation holds and releases pass `None` since they
    /// produce no ledger transaction.
    pub fn apply_delta(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        on_hand_delta: Decimal,
        reserved_delta: Decimal,
        transaction_id: Option<Uuid>,
    ) -> Result<StockLevel, InventoryError> {
        let key = StockKey::new(product_id, warehouse_id);
        let mut row = self
            .levels
            .entry(key)
            .or_insert_with(|| StockLevel::zeroed(product_id, warehouse_id));

        let new_on_hand = row.quantity_on_hand + on_hand_delta;
        let new_reserved = row.quantity_reserved + reserved_delta;

        if new_on_hand < Decimal::ZERO {
            error!(
                %product_id, %warehouse_id,
                on_hand = %row.quantity_on_hand, delta = %on_hand_delta,
                "ledger guard tripped: on-hand would go negative"
            );
            return Err(InventoryError::integrity(format!(
                "on-hand for product {} at warehouse {} would become {}",
                product_id, warehouse_id, new_on_hand
            )));
        }
        if new_reserved < Decimal::ZERO {
            error!(
                %product_id, %warehouse_id,
                reserved = %row.quantity_reserved, delta = %reserved_delta,
                "ledger guard tripped: reserved would go negative"
            );
            return Err(InventoryError::integrity(format!(
                "reserved for product {} at warehouse {} would become {}",
                product_id, warehouse_id, new_reserved
            )));
        }
        if new_reserved > new_on_hand {
            error!(
                %product_id, %warehouse_id,
                on_hand = %new_on_hand, reserved = %new_reserved,
                "ledger guard tripped: reserved would exceed on-hand"
            );
            return Err(InventoryError::integrity(format!(
                "reserved {} would exceed on-hand {} for product {} at warehouse {}",
                new_reserved, new_on_hand, product_id, warehouse_id
            )));
        }

        row.quantity_on_hand = new_on_hand;
        row.quantity_reserved = new_reserved;
        if transaction_id.is_some() {
            row.last_transaction_id = transaction_id;
        }
        row.last_updated_at = Utc::now();
        Ok(row.clone())
    }

    /// Snapshot of every row, for consistency probes.
    pub fn snapshot(&self) -> Vec<StockLevel> {
        self.levels.iter().map(|entry| entry.clone()).collect()
    }
}

impl Default for QuantityLedger {
    fn default() -> Self {
        Self::new()
    }
}
