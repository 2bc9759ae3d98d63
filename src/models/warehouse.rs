use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter)]
pub enum WarehouseType {
    /// Primary warehouse.
    Main,
    /// Regional distribution center.
    Regional,
    /// Temporary / in-transit storage.
    Transit,
    /// Returns and refurbishment.
    ReturnCenter,
    /// Logical warehouse with no physical location.
    Virtual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: Uuid,
    /// Unique short code, e.g. "MAIN-WH".
    pub code: String,
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub capacity: Option<Decimal>,
    pub manager_name: Option<String>,
    pub manager_email: Option<String>,
    pub manager_phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
