use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Unified error type for all core operations.
///
/// Variants map onto the failure taxonomy the callers are expected to
/// branch on: not-found, business-rule violation, integrity fault,
/// duplicate key, and lock contention. Every operation is all-or-nothing,
/// so an error never leaves partial ledger state behind.
#[derive(Error, Debug, Serialize, Clone, PartialEq)]
pub enum InventoryError {
    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Warehouse {0} not found")]
    WarehouseNotFound(Uuid),

    #[error("Stock transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("Purchase order {0} not found")]
    PurchaseOrderNotFound(Uuid),

    #[error("Stock alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("Insufficient stock for product {product_id} at warehouse {warehouse_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        warehouse_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid stock operation: {0}")]
    InvalidStockOperation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{entity} with key '{key}' already exists")]
    DuplicateEntity { entity: &'static str, key: String },

    /// An internal invariant was about to be broken. Logged as a defect;
    /// the operation is aborted with no partial state committed.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Lock acquisition exceeded the configured bound. The whole operation
    /// is safe to retry from the caller's side.
    #[error("Timed out acquiring stock lock for product {product_id} at warehouse {warehouse_id} after {timeout_ms}ms")]
    LockTimeout {
        product_id: Uuid,
        warehouse_id: Uuid,
        timeout_ms: u64,
    },

    #[error("Event error: {0}")]
    EventError(String),
}

impl InventoryError {
    pub fn invalid_op(reason: impl Into<String>) -> Self {
        InventoryError::InvalidStockOperation(reason.into())
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        InventoryError::IntegrityViolation(reason.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::LockTimeout { .. })
    }
}

impl From<validator::ValidationErrors> for InventoryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        InventoryError::ValidationError(errors.to_string())
    }
}
