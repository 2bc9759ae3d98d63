#![allow(dead_code)]

use std::sync::Arc;

use inventory_core::catalog::{InMemoryCatalog, NewProduct, NewWarehouse};
use inventory_core::config::CoreConfig;
use inventory_core::events::Event;
use inventory_core::models::{Product, ProductCategory, UnitOfMeasure, Warehouse, WarehouseType};
use inventory_core::InventoryCore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

pub struct TestContext {
    pub core: InventoryCore,
    pub catalog: Arc<InMemoryCatalog>,
    /// Keep the receiver alive so post-commit event dispatch succeeds.
    pub events: mpsc::Receiver<Event>,
}

pub fn setup() -> TestContext {
    let (core, catalog, events) = InventoryCore::in_memory(CoreConfig::default());
    TestContext {
        core,
        catalog,
        events,
    }
}

pub fn sample_product(sku: &str, minimum: Decimal, reorder_point: Decimal) -> NewProduct {
    NewProduct {
        sku: sku.to_string(),
        name: format!("Product {}", sku),
        description: String::new(),
        category: ProductCategory::Consumables,
        unit_of_measure: UnitOfMeasure::Piece,
        minimum_stock_level: minimum,
        reorder_point,
        reorder_quantity: dec!(50),
        maximum_stock_level: None,
        unit_cost: Some(dec!(2.50)),
        created_by: "tests".into(),
    }
}

pub fn sample_warehouse(code: &str) -> NewWarehouse {
    NewWarehouse {
        code: code.to_string(),
        name: format!("Warehouse {}", code),
        warehouse_type: WarehouseType::Main,
        capacity: None,
        manager_name: None,
        manager_email: None,
        manager_phone: None,
    }
}

impl TestContext {
    pub fn register_product(&self, sku: &str, minimum: Decimal, reorder: Decimal) -> Product {
        self.catalog
            .register_product(sample_product(sku, minimum, reorder))
            .expect("register product")
    }

    pub fn register_warehouse(&self, code: &str) -> Warehouse {
        self.catalog
            .register_warehouse(sample_warehouse(code))
            .expect("register warehouse")
    }

    /// Collects every event currently sitting in the channel.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut collected = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            collected.push(event);
        }
        collected
    }
}
