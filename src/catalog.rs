use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::InventoryError;
use crate::models::{Product, ProductCategory, UnitOfMeasure, Warehouse, WarehouseType};

/// Resolves product and warehouse existence for the core.
///
/// In production this fronts the catalog service; the in-memory
/// implementation below backs tests and single-process embedding.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn product(&self, product_id: Uuid) -> Result<Product, InventoryError>;
    async fn warehouse(&self, warehouse_id: Uuid) -> Result<Warehouse, InventoryError>;
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must not be negative"));
    }
    Ok(())
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must be positive"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: String,
    pub category: ProductCategory,
    pub unit_of_measure: UnitOfMeasure,
    #[validate(custom = "validate_non_negative")]
    pub minimum_stock_level: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub reorder_point: Decimal,
    #[validate(custom = "validate_positive")]
    pub reorder_quantity: Decimal,
    #[validate(custom = "validate_positive")]
    pub maximum_stock_level: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub unit_cost: Option<Decimal>,
    pub created_by: String,
}

/// Mutable product attributes; identity (`id`, `sku`) never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProductUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    #[validate(custom = "validate_non_negative")]
    pub minimum_stock_level: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub reorder_point: Option<Decimal>,
    #[validate(custom = "validate_positive")]
    pub reorder_quantity: Option<Decimal>,
    #[validate(custom = "validate_positive")]
    pub maximum_stock_level: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewWarehouse {
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub warehouse_type: WarehouseType,
    #[validate(custom = "validate_positive")]
    pub capacity: Option<Decimal>,
    pub manager_name: Option<String>,
    #[validate(email)]
    pub manager_email: Option<String>,
    pub manager_phone: Option<String>,
}

/// In-memory catalog with SKU/code uniqueness.
pub struct InMemoryCatalog {
    products: DashMap<Uuid, Product>,
    skus: DashMap<String, Uuid>,
    warehouses: DashMap<Uuid, Warehouse>,
    codes: DashMap<String, Uuid>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            products: DashMap::new(),
            skus: DashMap::new(),
            warehouses: DashMap::new(),
            codes: DashMap::new(),
        }
    }

    #[instrument(skip(self, new))]
    pub fn register_product(&self, new: NewProduct) -> Result<Product, InventoryError> {
        new.validate()?;

        let id = Uuid::new_v4();
        match self.skus.entry(new.sku.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(InventoryError::DuplicateEntity {
                    entity: "product",
                    key: new.sku,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = Utc::now();
        let product = Product {
            id,
            sku: new.sku,
            name: new.name,
            description: new.description,
            category: new.category,
            unit_of_measure: new.unit_of_measure,
            minimum_stock_level: new.minimum_stock_level,
            reorder_point: new.reorder_point,
            reorder_quantity: new.reorder_quantity,
            maximum_stock_level: new.maximum_stock_level,
            unit_cost: new.unit_cost,
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: new.created_by.clone(),
            updated_by: new.created_by,
        };
        self.products.insert(id, product.clone());
        info!(product_id = %id, sku = %product.sku, "Registered product");
        Ok(product)
    }

    #[instrument(skip(self, update))]
    pub fn update_product(
        &self,
        product_id: Uuid,
        update: ProductUpdate,
        updated_by: &str,
    ) -> Result<Product, InventoryError> {
        update.validate()?;

        let mut entry = self
            .products
            .get_mut(&product_id)
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        if let Some(name) = update.name {
            entry.name = name;
        }
        if let Some(description) = update.description {
            entry.description = description;
        }
        if let Some(category) = update.category {
            entry.category = category;
        }
        if let Some(minimum) = update.minimum_stock_level {
            entry.minimum_stock_level = minimum;
        }
        if let Some(reorder_point) = update.reorder_point {
            entry.reorder_point = reorder_point;
        }
        if let Some(reorder_quantity) = update.reorder_quantity {
            entry.reorder_quantity = reorder_quantity;
        }
        if let Some(maximum) = update.maximum_stock_level {
            entry.maximum_stock_level = Some(maximum);
        }
        if let Some(unit_cost) = update.unit_cost {
            entry.unit_cost = Some(unit_cost);
        }
        entry.updated_at = Utc::now();
        entry.updated_by = updated_by.to_string();
        Ok(entry.clone())
    }

    #[instrument(skip(self))]
    pub fn deactivate_product(
        &self,
        product_id: Uuid,
        updated_by: &str,
    ) -> Result<Product, InventoryError> {
        let mut entry = self
            .products
            .get_mut(&product_id)
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        entry.is_active = false;
        entry.updated_at = Utc::now();
        entry.updated_by = updated_by.to_string();
        info!(product_id = %product_id, "Deactivated product");
        Ok(entry.clone())
    }

    #[instrument(skip(self, new))]
    pub fn register_warehouse(&self, new: NewWarehouse) -> Result<Warehouse, InventoryError> {
        new.validate()?;

        let id = Uuid::new_v4();
        match self.codes.entry(new.code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(InventoryError::DuplicateEntity {
                    entity: "warehouse",
                    key: new.code,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = Utc::now();
        let warehouse = Warehouse {
            id,
            code: new.code,
            name: new.name,
            warehouse_type: new.warehouse_type,
            capacity: new.capacity,
            manager_name: new.manager_name,
            manager_email: new.manager_email,
            manager_phone: new.manager_phone,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.warehouses.insert(id, warehouse.clone());
        info!(warehouse_id = %id, code = %warehouse.code, "Registered warehouse");
        Ok(warehouse)
    }

    #[instrument(skip(self))]
    pub fn deactivate_warehouse(&self, warehouse_id: Uuid) -> Result<Warehouse, InventoryError> {
        let mut entry = self
            .warehouses
            .get_mut(&warehouse_id)
            .ok_or(InventoryError::WarehouseNotFound(warehouse_id))?;
        entry.is_active = false;
        entry.updated_at = Utc::now();
        info!(warehouse_id = %warehouse_id, "Deactivated warehouse");
        Ok(entry.clone())
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn product(&self, product_id: Uuid) -> Result<Product, InventoryError> {
        self.products
            .get(&product_id)
            .map(|p| p.clone())
            .ok_or(InventoryError::ProductNotFound(product_id))
    }

    async fn warehouse(&self, warehouse_id: Uuid) -> Result<Warehouse, InventoryError> {
        self.warehouses
            .get(&warehouse_id)
            .map(|w| w.clone())
            .ok_or(InventoryError::WarehouseNotFound(warehouse_id))
    }
}
