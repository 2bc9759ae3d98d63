use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
pub enum PurchaseOrderStatus {
    Draft,
    Submitted,
    Confirmed,
    PartiallyReceived,
    Received,
    Cancelled,
    Closed,
}

impl PurchaseOrderStatus {
    /// Receipts may only be posted against confirmed orders, including
    /// those already partially received.
    pub fn is_receivable(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Confirmed | PurchaseOrderStatus::PartiallyReceived
        )
    }

    /// Cancellation is allowed from any state before goods arrive.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Draft
                | PurchaseOrderStatus::Submitted
                | PurchaseOrderStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    /// Accumulates across partial receipts; may exceed `quantity` when
    /// over-receipt is accepted.
    pub received_quantity: Decimal,
    pub notes: Option<String>,
}

impl PurchaseOrderItem {
    pub fn total_cost(&self) -> Decimal {
        self.quantity * self.unit_cost
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity >= self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    /// Unique, e.g. "PO-2026-000042".
    pub order_number: String,
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    pub order_date: DateTime<Utc>,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub status: PurchaseOrderStatus,
    pub sub_total: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub notes: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub items: Vec<PurchaseOrderItem>,
}

impl PurchaseOrder {
    pub fn total_amount(&self) -> Decimal {
        self.sub_total + self.tax_amount + self.shipping_cost
    }

    pub fn item(&self, item_id: Uuid) -> Option<&PurchaseOrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Status implied by the items' received quantities: `Received` when
    /// every item is fully received, `PartiallyReceived` when any receipt
    /// has been posted, otherwise the current status stands.
    pub fn derived_receipt_status(&self) -> Option<PurchaseOrderStatus> {
        if self.items.is_empty() {
            return None;
        }
        if self.items.iter().all(|i| i.is_fully_received()) {
            Some(PurchaseOrderStatus::Received)
        } else if self.items.iter().any(|i| i.received_quantity > Decimal::ZERO) {
            Some(PurchaseOrderStatus::PartiallyReceived)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_with_items(received: &[(Decimal, Decimal)]) -> PurchaseOrder {
        let id = Uuid::new_v4();
        PurchaseOrder {
            id,
            order_number: "PO-2026-000001".into(),
            supplier_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            order_date: Utc::now(),
            expected_delivery_date: None,
            actual_delivery_date: None,
            status: PurchaseOrderStatus::Confirmed,
            sub_total: dec!(100),
            tax_amount: dec!(7),
            shipping_cost: dec!(12),
            notes: None,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
            created_by: "test".into(),
            updated_at: Utc::now(),
            updated_by: "test".into(),
            items: received
                .iter()
                .map(|(qty, recv)| PurchaseOrderItem {
                    id: Uuid::new_v4(),
                    purchase_order_id: id,
                    product_id: Uuid::new_v4(),
                    quantity: *qty,
                    unit_cost: dec!(3),
                    received_quantity: *recv,
                    notes: None,
                })
                .collect(),
        }
    }

    #[test]
    fn total_amount_sums_components() {
        let order = order_with_items(&[]);
        assert_eq!(order.total_amount(), dec!(119));
    }

    #[test]
    fn derived_status_tracks_item_receipts() {
        let untouched = order_with_items(&[(dec!(10), dec!(0)), (dec!(5), dec!(0))]);
        assert_eq!(untouched.derived_receipt_status(), None);

        let partial = order_with_items(&[(dec!(10), dec!(10)), (dec!(5), dec!(3))]);
        assert_eq!(
            partial.derived_receipt_status(),
            Some(PurchaseOrderStatus::PartiallyReceived)
        );

        let full = order_with_items(&[(dec!(10), dec!(10)), (dec!(5), dec!(5))]);
        assert_eq!(
            full.derived_receipt_status(),
            Some(PurchaseOrderStatus::Received)
        );
    }

    #[test]
    fn over_receipt_counts_as_fully_received() {
        let over = order_with_items(&[(dec!(10), dec!(12))]);
        assert_eq!(
            over.derived_receipt_status(),
            Some(PurchaseOrderStatus::Received)
        );
    }
}
