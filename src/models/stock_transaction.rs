use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of stock movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Receiving stock; increases on-hand.
    Receipt,
    /// Issuing/selling stock; decreases on-hand.
    Issue,
    /// Manual correction; carries an explicit signed delta.
    Adjustment,
    /// Movement between warehouses, recorded as two linked transactions.
    Transfer,
    /// Customer return to stock; increases on-hand.
    Return,
    /// Damaged goods write-off; decreases on-hand.
    Damage,
    /// Physical count correction; delta derived from the counted quantity.
    StockTake,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receipt => "receipt",
            TransactionType::Issue => "issue",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Transfer => "transfer",
            TransactionType::Return => "return",
            TransactionType::Damage => "damage",
            TransactionType::StockTake => "stock_take",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(TransactionType::Receipt),
            "issue" => Some(TransactionType::Issue),
            "adjustment" => Some(TransactionType::Adjustment),
            "transfer" => Some(TransactionType::Transfer),
            "return" => Some(TransactionType::Return),
            "damage" => Some(TransactionType::Damage),
            "stock_take" => Some(TransactionType::StockTake),
            _ => None,
        }
    }

    /// Whether the stored quantity delta for this type must be negative.
    pub fn decreases_stock(&self) -> bool {
        matches!(self, TransactionType::Issue | TransactionType::Damage)
    }

    /// Whether the stored quantity delta for this type must be positive.
    pub fn increases_stock(&self) -> bool {
        matches!(self, TransactionType::Receipt | TransactionType::Return)
    }
}

/// Immutable ledger entry for one stock movement.
///
/// Records are append-only: a committed transaction is never edited or
/// deleted. Undo is expressed as a new transaction with the inverted
/// delta, and the two records reference each other. The only permitted
/// in-place change is stamping `is_reversed` /
/// `reversed_by_transaction_id` on the original when its reversal commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: Uuid,
    /// Unique, e.g. "TXN-2026-001234".
    pub transaction_number: String,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub transaction_type: TransactionType,
    /// Signed ledger delta: negative for stock-decreasing movements.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    /// PO number, invoice, order id, etc.
    pub reference_number: Option<String>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    /// The other leg of a transfer; both legs reference each other.
    pub transfer_pair_id: Option<Uuid>,
    /// Reservation this issue consumed, when it originated from one.
    pub consumed_reservation_id: Option<Uuid>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub is_reversed: bool,
    pub reversed_by_transaction_id: Option<Uuid>,
    /// Set on a reversal record, pointing back at what it undoes.
    pub reverses_transaction_id: Option<Uuid>,
}

impl StockTransaction {
    /// Quantity × unit cost; zero when no cost was captured.
    pub fn total_cost(&self) -> Decimal {
        self.unit_cost
            .map(|cost| self.quantity * cost)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses_transaction_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(TransactionType::Receipt, "receipt")]
    #[test_case(TransactionType::Issue, "issue")]
    #[test_case(TransactionType::Adjustment, "adjustment")]
    #[test_case(TransactionType::Transfer, "transfer")]
    #[test_case(TransactionType::Return, "return")]
    #[test_case(TransactionType::Damage, "damage")]
    #[test_case(TransactionType::StockTake, "stock_take")]
    fn type_round_trips_through_str(t: TransactionType, s: &str) {
        assert_eq!(t.as_str(), s);
        assert_eq!(TransactionType::from_str(s), Some(t));
    }

    #[test]
    fn unknown_type_string_is_rejected() {
        assert_eq!(TransactionType::from_str("unknown"), None);
    }

    #[test]
    fn total_cost_follows_signed_quantity() {
        let txn = StockTransaction {
            id: Uuid::new_v4(),
            transaction_number: "TXN-2026-000001".into(),
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            transaction_type: TransactionType::Issue,
            quantity: dec!(-4),
            unit_cost: Some(dec!(2.50)),
            reference_number: None,
            source_warehouse_id: None,
            destination_warehouse_id: None,
            transfer_pair_id: None,
            consumed_reservation_id: None,
            reason: None,
            notes: None,
            transaction_date: Utc::now(),
            created_at: Utc::now(),
            created_by: "test".into(),
            is_reversed: false,
            reversed_by_transaction_id: None,
            reverses_transaction_id: None,
        };
        assert_eq!(txn.total_cost(), dec!(-10.00));
    }
}
