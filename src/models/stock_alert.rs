use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum StockAlertType {
    /// On-hand below the product's minimum stock level.
    LowStock,
    /// Available at or below the product's reorder point.
    BelowReorderPoint,
    /// On-hand above the product's configured maximum.
    Overstock,
    /// No transactions for an extended period. Raised by an external
    /// sweep, not by the threshold monitor.
    NoMovement,
    /// Data-integrity defect; should be unreachable given the ledger guard.
    NegativeStock,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum AlertSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
pub enum AlertStatus {
    New,
    Acknowledged,
    InProgress,
    Resolved,
    Ignored,
}

impl AlertStatus {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            AlertStatus::New | AlertStatus::Acknowledged | AlertStatus::InProgress
        )
    }
}

/// System-generated alert tied to a (product, warehouse, type) triple.
/// At most one open alert exists per triple; repeat triggers refresh the
/// open record instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub alert_type: StockAlertType,
    pub current_quantity: Decimal,
    /// The threshold whose crossing triggered the alert.
    pub threshold_quantity: Decimal,
    pub message: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl StockAlert {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn severity_ordering_matches_urgency() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[rstest]
    #[case(AlertStatus::New, true)]
    #[case(AlertStatus::Acknowledged, true)]
    #[case(AlertStatus::InProgress, true)]
    #[case(AlertStatus::Resolved, false)]
    #[case(AlertStatus::Ignored, false)]
    fn open_statuses(#[case] status: AlertStatus, #[case] open: bool) {
        assert_eq!(status.is_open(), open);
    }
}
