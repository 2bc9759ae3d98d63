use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::catalog::CatalogProvider;
use crate::errors::InventoryError;
use crate::events::{Event, EventBatch, Outbox};
use crate::models::{PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus, TransactionType};
use crate::services::numbering::NumberSequence;
use crate::services::transactions::{NewTransaction, TransactionProcessor};

const NUMBER_ATTEMPTS: u32 = 5;

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must be positive"));
    }
    Ok(())
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must not be negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrderItem {
    pub product_id: Uuid,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub unit_cost: Decimal,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrder {
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    #[validate(custom = "validate_non_negative")]
    pub tax_amount: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub shipping_cost: Decimal,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<NewPurchaseOrderItem>,
    #[validate(length(min = 1, max = 100))]
    pub created_by: String,
}

/// One line of a receiving call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineReceipt {
    pub item_id: Uuid,
    pub quantity: Decimal,
}

/// Per-line outcome. Over-receipt beyond the ordered quantity is
/// permitted but flagged, matching procurement tolerance; the flag is the
/// caller's cue to review, not a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineReceiptOutcome {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub quantity_received: Decimal,
    /// Cumulative received quantity on the item after this call.
    pub received_quantity: Decimal,
    pub ordered_quantity: Decimal,
    pub over_received: bool,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingResult {
    pub purchase_order_id: Uuid,
    pub order_number: String,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<LineReceiptOutcome>,
    pub received_at: DateTime<Utc>,
}

/// Purchase-order lifecycle and receiving.
///
/// Receiving a batch of lines is one unit of work: every line is
/// validated before any stock moves, so a bad line (unknown item, zero
/// quantity, unknown product) leaves the ledger and the order untouched.
pub struct ReceivingCoordinator {
    catalog: Arc<dyn CatalogProvider>,
    processor: Arc<TransactionProcessor>,
    outbox: Outbox,
    orders: DashMap<Uuid, PurchaseOrder>,
    numbers: DashMap<String, Uuid>,
    sequence: NumberSequence,
}

impl ReceivingCoordinator {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        processor: Arc<TransactionProcessor>,
        outbox: Outbox,
        number_prefix: &str,
    ) -> Self {
        Self {
            catalog,
            processor,
            outbox,
            orders: DashMap::new(),
            numbers: DashMap::new(),
            sequence: NumberSequence::new(number_prefix),
        }
    }

    pub fn purchase_order(&self, order_id: Uuid) -> Option<PurchaseOrder> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    #[instrument(skip(self, request), fields(supplier_id = %request.supplier_id))]
    pub async fn create(&self, request: NewPurchaseOrder) -> Result<PurchaseOrder, InventoryError> {
        request.validate()?;

        let warehouse = self.catalog.warehouse(request.warehouse_id).await?;
        if !warehouse.is_active {
            return Err(InventoryError::invalid_op(format!(
                "warehouse {} is inactive",
                warehouse.code
            )));
        }
        for item in &request.items {
            item.validate()?;
            let product = self.catalog.product(item.product_id).await?;
            if !product.is_active {
                return Err(InventoryError::invalid_op(format!(
                    "product {} is inactive",
                    product.sku
                )));
            }
        }

        let id = Uuid::new_v4();
        let order_number = self.unique_number(id)?;
        let items: Vec<PurchaseOrderItem> = request
            .items
            .iter()
            .map(|i| PurchaseOrderItem {
                id: Uuid::new_v4(),
                purchase_order_id: id,
                product_id: i.product_id,
                quantity: i.quantity,
                unit_cost: i.unit_cost,
                received_quantity: Decimal::ZERO,
                notes: i.notes.clone(),
            })
            .collect();
        let sub_total: Decimal = items.iter().map(|i| i.total_cost()).sum();

        let now = Utc::now();
        let order = PurchaseOrder {
            id,
            order_number,
            supplier_id: request.supplier_id,
            warehouse_id: request.warehouse_id,
            order_date: now,
            expected_delivery_date: request.expected_delivery_date,
            actual_delivery_date: None,
            status: PurchaseOrderStatus::Draft,
            sub_total,
            tax_amount: request.tax_amount,
            shipping_cost: request.shipping_cost,
            notes: request.notes.clone(),
            approved_by: None,
            approved_at: None,
            created_at: now,
            created_by: request.created_by.clone(),
            updated_at: now,
            updated_by: request.created_by.clone(),
            items,
        };
        self.orders.insert(id, order.clone());
        info!(order_id = %id, order_number = %order.order_number, "Purchase order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub fn submit(&self, order_id: Uuid, user: &str) -> Result<PurchaseOrder, InventoryError> {
        self.transition(order_id, PurchaseOrderStatus::Draft, PurchaseOrderStatus::Submitted, user)
    }

    #[instrument(skip(self))]
    pub fn confirm(&self, order_id: Uuid, user: &str) -> Result<PurchaseOrder, InventoryError> {
        let order = self.transition(
            order_id,
            PurchaseOrderStatus::Submitted,
            PurchaseOrderStatus::Confirmed,
            user,
        )?;
        if let Some(mut entry) = self.orders.get_mut(&order_id) {
            entry.approved_by = Some(user.to_string());
            entry.approved_at = Some(Utc::now());
            return Ok(entry.clone());
        }
        Ok(order)
    }

    #[instrument(skip(self))]
    pub fn cancel(&self, order_id: Uuid, user: &str) -> Result<PurchaseOrder, InventoryError> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(InventoryError::PurchaseOrderNotFound(order_id))?;
        if !entry.status.is_cancellable() {
            return Err(InventoryError::invalid_op(format!(
                "purchase order {} cannot be cancelled from status {}",
                entry.order_number, entry.status
            )));
        }
        entry.status = PurchaseOrderStatus::Cancelled;
        entry.updated_at = Utc::now();
        entry.updated_by = user.to_string();
        info!(order_id = %order_id, "Purchase order cancelled");
        Ok(entry.clone())
    }

    #[instrument(skip(self))]
    pub fn close(&self, order_id: Uuid, user: &str) -> Result<PurchaseOrder, InventoryError> {
        self.transition(order_id, PurchaseOrderStatus::Received, PurchaseOrderStatus::Closed, user)
    }

    fn transition(
        &self,
        order_id: Uuid,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
        user: &str,
    ) -> Result<PurchaseOrder, InventoryError> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(InventoryError::PurchaseOrderNotFound(order_id))?;
        if entry.status != from {
            return Err(InventoryError::invalid_op(format!(
                "purchase order {} cannot move from {} to {}",
                entry.order_number, entry.status, to
            )));
        }
        entry.status = to;
        entry.updated_at = Utc::now();
        entry.updated_by = user.to_string();
        info!(order_id = %order_id, status = %to, "Purchase order status changed");
        Ok(entry.clone())
    }

    /// Posts a batch of line receipts against a confirmed order.
    ///
    /// All-or-nothing: one receipt transaction per line is applied through
    /// the transaction processor as a single unit, item received
    /// quantities are accumulated, and the order status is recomputed.
    #[instrument(skip(self, lines), fields(order_id = %order_id, line_count = lines.len()))]
    pub async fn receive(
        &self,
        order_id: Uuid,
        lines: Vec<LineReceipt>,
        received_by: &str,
    ) -> Result<ReceivingResult, InventoryError> {
        let order = self
            .purchase_order(order_id)
            .ok_or(InventoryError::PurchaseOrderNotFound(order_id))?;
        if !order.status.is_receivable() {
            return Err(InventoryError::invalid_op(format!(
                "purchase order {} is not receivable in status {}",
                order.order_number, order.status
            )));
        }
        if lines.is_empty() {
            return Err(InventoryError::invalid_op("no receipt lines supplied"));
        }

        let mut requests = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order.item(line.item_id).ok_or_else(|| {
                InventoryError::invalid_op(format!(
                    "item {} is not part of purchase order {}",
                    line.item_id, order.order_number
                ))
            })?;
            if line.quantity <= Decimal::ZERO {
                return Err(InventoryError::invalid_op(
                    "received quantity must be positive",
                ));
            }
            requests.push(NewTransaction {
                quantity: Some(line.quantity),
                unit_cost: Some(item.unit_cost),
                reference_number: Some(order.order_number.clone()),
                ..NewTransaction::new(
                    TransactionType::Receipt,
                    item.product_id,
                    order.warehouse_id,
                    received_by,
                )
            });
        }

        // Every line validated; the processor applies them as one unit.
        let transactions = self.processor.process_batch(requests).await?;

        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(InventoryError::PurchaseOrderNotFound(order_id))?;
        let mut outcomes = Vec::with_capacity(lines.len());
        for (line, txn) in lines.iter().zip(&transactions) {
            let item = entry
                .items
                .iter_mut()
                .find(|i| i.id == line.item_id)
                .ok_or_else(|| {
                    InventoryError::integrity("received item disappeared from order")
                })?;
            item.received_quantity += line.quantity;
            outcomes.push(LineReceiptOutcome {
                item_id: item.id,
                product_id: item.product_id,
                quantity_received: line.quantity,
                received_quantity: item.received_quantity,
                ordered_quantity: item.quantity,
                over_received: item.received_quantity > item.quantity,
                transaction_id: txn.id,
            });
        }
        if let Some(status) = entry.derived_receipt_status() {
            entry.status = status;
            if status == PurchaseOrderStatus::Received {
                entry.actual_delivery_date = Some(Utc::now());
            }
        }
        entry.updated_at = Utc::now();
        entry.updated_by = received_by.to_string();
        let updated = entry.clone();
        drop(entry);

        let received_at = Utc::now();
        let total_value: Decimal = outcomes
            .iter()
            .map(|o| {
                updated
                    .item(o.item_id)
                    .map(|i| o.quantity_received * i.unit_cost)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum();
        let mut batch = EventBatch::new();
        batch.stage(Event::PurchaseOrderReceived {
            purchase_order_id: updated.id,
            order_number: updated.order_number.clone(),
            supplier_id: updated.supplier_id,
            warehouse_id: updated.warehouse_id,
            total_items: outcomes.len(),
            total_value,
            received_at,
        });
        self.outbox.publish(batch).await;

        info!(
            order_id = %order_id,
            order_number = %updated.order_number,
            status = %updated.status,
            lines = outcomes.len(),
            "Purchase order receipt committed"
        );
        Ok(ReceivingResult {
            purchase_order_id: updated.id,
            order_number: updated.order_number,
            status: updated.status,
            lines: outcomes,
            received_at,
        })
    }

    fn unique_number(&self, order_id: Uuid) -> Result<String, InventoryError> {
        for _ in 0..NUMBER_ATTEMPTS {
            let candidate = self.sequence.next();
            match self.numbers.entry(candidate.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(order_id);
                    return Ok(candidate);
                }
            }
        }
        Err(InventoryError::DuplicateEntity {
            entity: "purchase order",
            key: "order number space exhausted".to_string(),
        })
    }
}
