use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AlertSeverity, StockAlertType, TransactionType};

pub mod outbox;

pub use outbox::{EventBatch, Outbox};

/// Outbound notifications consumed by external systems.
///
/// Each variant is a flat record of the fields the corresponding domain
/// mutation produced. Events are dispatched after the mutation commits,
/// at least once; consumers must tolerate duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockTransactionCreated {
        transaction_id: Uuid,
        transaction_number: String,
        transaction_type: TransactionType,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: Decimal,
        unit_cost: Option<Decimal>,
        created_at: DateTime<Utc>,
    },
    StockLevelChanged {
        product_id: Uuid,
        warehouse_id: Uuid,
        old_quantity: Decimal,
        new_quantity: Decimal,
        change_reason: String,
        occurred_at: DateTime<Utc>,
    },
    ProductReorderPointReached {
        product_id: Uuid,
        warehouse_id: Uuid,
        current_quantity: Decimal,
        total_quantity: Decimal,
        reorder_point: Decimal,
        reorder_quantity: Decimal,
        occurred_at: DateTime<Utc>,
    },
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        order_number: String,
        supplier_id: Uuid,
        warehouse_id: Uuid,
        total_items: usize,
        total_value: Decimal,
        received_at: DateTime<Utc>,
    },
    StockAlertRaised {
        alert_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        alert_type: StockAlertType,
        severity: AlertSeverity,
        current_quantity: Decimal,
        threshold_quantity: Decimal,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends and logs on failure instead of propagating; used where a
    /// committed mutation must not be failed by the notification path.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event delivery failed: {}", e);
        }
    }
}

/// Builds the outbound channel with the configured capacity.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains and logs events. Embedding applications that forward events to
/// a broker replace this with their own consumer loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");
    while let Some(event) = rx.recv().await {
        info!(?event, "Received event");
    }
    info!("Event channel closed; stopping event processing loop");
}
