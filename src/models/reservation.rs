use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Holding quantity against available stock.
    Active,
    /// Quantity returned to available; no transaction recorded.
    Released,
    /// Converted into an Issue transaction.
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ReservationStatus::Active),
            "released" => Some(ReservationStatus::Released),
            "consumed" => Some(ReservationStatus::Consumed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

/// A hold against available quantity for a pending commitment.
///
/// Reservations are pure availability accounting: they move quantity from
/// available to reserved without touching on-hand, and leave no ledger
/// transaction unless consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    /// Owning reference, e.g. a sales order id.
    pub reference_id: Uuid,
    pub reference_type: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub released_at: Option<DateTime<Utc>>,
    /// Issue transaction produced by consumption.
    pub consumed_by_transaction_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_and_terminality() {
        assert_eq!(
            ReservationStatus::from_str("active"),
            Some(ReservationStatus::Active)
        );
        assert_eq!(ReservationStatus::from_str("gone"), None);
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Consumed.is_terminal());
    }
}
