use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authoritative quantity record for one (product, warehouse) pair.
///
/// `quantity_on_hand` and `quantity_reserved` are stored; availability is
/// always derived on read so the three can never drift apart. Both stored
/// quantities are non-negative and reserved never exceeds on-hand; the
/// ledger enforces this as an integrity guard on every apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity_on_hand: Decimal,
    pub quantity_reserved: Decimal,
    pub last_transaction_id: Option<Uuid>,
    pub last_updated_at: DateTime<Utc>,
}

impl StockLevel {
    pub fn zeroed(product_id: Uuid, warehouse_id: Uuid) -> Self {
        Self {
            product_id,
            warehouse_id,
            quantity_on_hand: Decimal::ZERO,
            quantity_reserved: Decimal::ZERO,
            last_transaction_id: None,
            last_updated_at: Utc::now(),
        }
    }

    /// On-hand minus reserved: the quantity new commitments can be made
    /// against.
    pub fn quantity_available(&self) -> Decimal {
        self.quantity_on_hand - self.quantity_reserved
    }
}
