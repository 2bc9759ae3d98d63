use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Broad product classification used for reporting and alert routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter)]
pub enum ProductCategory {
    Electronics,
    Consumables,
    Equipment,
    Tools,
    Safety,
    RawMaterials,
    FinishedGoods,
    Packaging,
    Other,
}

/// Unit the product is counted or measured in. Quantities are decimal
/// throughout so weight/volume units can carry fractional amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter)]
pub enum UnitOfMeasure {
    Piece,
    Box,
    Pallet,
    Kilogram,
    Gram,
    Pound,
    Liter,
    Milliliter,
    Gallon,
    Meter,
    Centimeter,
    Foot,
    SquareMeter,
    CubicMeter,
}

/// Catalog product. Identity (`id`, `sku`) is immutable after
/// registration; the remaining attributes change only through explicit
/// catalog update operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub category: ProductCategory,
    pub unit_of_measure: UnitOfMeasure,
    /// On-hand below this raises a LowStock alert.
    pub minimum_stock_level: Decimal,
    /// Available at or below this raises a BelowReorderPoint alert.
    pub reorder_point: Decimal,
    /// Suggested replenishment quantity carried on reorder notifications.
    pub reorder_quantity: Decimal,
    /// On-hand above this raises an Overstock alert, when set.
    pub maximum_stock_level: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

impl Product {
    pub fn is_below_minimum(&self, on_hand: Decimal) -> bool {
        on_hand < self.minimum_stock_level
    }

    pub fn is_at_or_below_reorder_point(&self, available: Decimal) -> bool {
        available <= self.reorder_point
    }

    pub fn is_overstocked(&self, on_hand: Decimal) -> bool {
        self.maximum_stock_level
            .map(|max| on_hand > max)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product_with_thresholds(min: Decimal, reorder: Decimal, max: Option<Decimal>) -> Product {
        Product {
            id: Uuid::new_v4(),
            sku: "SKU-001".into(),
            name: "Test product".into(),
            description: String::new(),
            category: ProductCategory::Consumables,
            unit_of_measure: UnitOfMeasure::Piece,
            minimum_stock_level: min,
            reorder_point: reorder,
            reorder_quantity: dec!(25),
            maximum_stock_level: max,
            unit_cost: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: "test".into(),
            updated_by: "test".into(),
        }
    }

    #[test]
    fn threshold_predicates() {
        let p = product_with_thresholds(dec!(10), dec!(20), Some(dec!(100)));
        assert!(p.is_below_minimum(dec!(9)));
        assert!(!p.is_below_minimum(dec!(10)));
        assert!(p.is_at_or_below_reorder_point(dec!(20)));
        assert!(!p.is_at_or_below_reorder_point(dec!(21)));
        assert!(p.is_overstocked(dec!(101)));
        assert!(!p.is_overstocked(dec!(100)));
    }

    #[test]
    fn overstock_requires_configured_maximum() {
        let p = product_with_thresholds(dec!(0), dec!(0), None);
        assert!(!p.is_overstocked(dec!(1_000_000)));
    }
}
