pub mod product;
pub mod purchase_order;
pub mod reservation;
pub mod stock_alert;
pub mod stock_level;
pub mod stock_transaction;
pub mod warehouse;

pub use product::{Product, ProductCategory, UnitOfMeasure};
pub use purchase_order::{PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus};
pub use reservation::{Reservation, ReservationStatus};
pub use stock_alert::{AlertSeverity, AlertStatus, StockAlert, StockAlertType};
pub use stock_level::StockLevel;
pub use stock_transaction::{StockTransaction, TransactionType};
pub use warehouse::{Warehouse, WarehouseType};
