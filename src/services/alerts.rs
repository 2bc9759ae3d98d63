use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::InventoryError;
use crate::events::{Event, EventBatch};
use crate::models::{
    AlertSeverity, AlertStatus, Product, StockAlert, StockAlertType, StockLevel,
};

/// Condition detected by one threshold evaluation.
struct Breach {
    alert_type: StockAlertType,
    severity: AlertSeverity,
    threshold: Decimal,
    current: Decimal,
}

/// Evaluates ledger state against product thresholds after every
/// successful mutation and maintains the open-alert set.
///
/// At most one open alert exists per (product, warehouse, alert type);
/// repeat triggers refresh the open record, and when the prevailing
/// condition changes class (reorder-point breach worsening into low
/// stock) the open record is escalated in place rather than duplicated.
/// Recovery above all thresholds auto-resolves with a system note.
pub struct ThresholdMonitor {
    alerts: DashMap<Uuid, StockAlert>,
    open: DashMap<(Uuid, Uuid, StockAlertType), Uuid>,
}

impl ThresholdMonitor {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            open: DashMap::new(),
        }
    }

    /// Called by the transaction processor with the freshly updated level
    /// while the pair lock is still held, so evaluations for one pair
    /// never race each other.
    pub fn evaluate(&self, product: &Product, level: &StockLevel, batch: &mut EventBatch) {
        let on_hand = level.quantity_on_hand;
        let available = level.quantity_available();

        let breach = if on_hand < Decimal::ZERO || level.quantity_reserved < Decimal::ZERO {
            // Unreachable given the ledger guard; seeing it means a defect.
            error!(
                product_id = %product.id, warehouse_id = %level.warehouse_id,
                %on_hand, reserved = %level.quantity_reserved,
                "negative quantity observed in threshold evaluation"
            );
            Some(Breach {
                alert_type: StockAlertType::NegativeStock,
                severity: AlertSeverity::Critical,
                threshold: Decimal::ZERO,
                current: on_hand,
            })
        } else if product.is_below_minimum(on_hand) {
            Some(Breach {
                alert_type: StockAlertType::LowStock,
                severity: AlertSeverity::High,
                threshold: product.minimum_stock_level,
                current: on_hand,
            })
        } else if product.is_at_or_below_reorder_point(available) {
            Some(Breach {
                alert_type: StockAlertType::BelowReorderPoint,
                severity: AlertSeverity::Medium,
                threshold: product.reorder_point,
                current: available,
            })
        } else if product.is_overstocked(on_hand) {
            Some(Breach {
                alert_type: StockAlertType::Overstock,
                severity: AlertSeverity::Low,
                threshold: product.maximum_stock_level.unwrap_or(Decimal::ZERO),
                current: on_hand,
            })
        } else {
            None
        };

        match breach {
            Some(breach) => self.raise_or_refresh(product, level, breach, batch),
            None => self.resolve_recovered(product.id, level.warehouse_id),
        }
    }

    fn raise_or_refresh(
        &self,
        product: &Product,
        level: &StockLevel,
        breach: Breach,
        batch: &mut EventBatch,
    ) {
        let pair = (product.id, level.warehouse_id);
        let key = (pair.0, pair.1, breach.alert_type);

        // Same condition still holding: refresh the open record quietly.
        if let Some(id) = self.open.get(&key).map(|e| *e) {
            if let Some(mut alert) = self.alerts.get_mut(&id) {
                alert.current_quantity = breach.current;
                alert.updated_at = Utc::now();
                return;
            }
        }

        // Condition changed class: escalate the pair's open threshold
        // alert in place instead of opening a second one.
        let existing = self.open_id_for_pair(pair.0, pair.1);
        let alert = if let Some(id) = existing {
            self.open.retain(|(p, w, _), v| !(*p == pair.0 && *w == pair.1 && *v == id));
            let mut entry = self.alerts.get_mut(&id).expect("open index points at alert");
            entry.alert_type = breach.alert_type;
            entry.severity = breach.severity;
            entry.threshold_quantity = breach.threshold;
            entry.current_quantity = breach.current;
            entry.message = alert_message(product, &breach);
            entry.updated_at = Utc::now();
            self.open.insert(key, id);
            entry.clone()
        } else {
            let alert = StockAlert {
                id: Uuid::new_v4(),
                product_id: product.id,
                warehouse_id: level.warehouse_id,
                alert_type: breach.alert_type,
                current_quantity: breach.current,
                threshold_quantity: breach.threshold,
                message: alert_message(product, &breach),
                severity: breach.severity,
                status: AlertStatus::New,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                acknowledged_at: None,
                acknowledged_by: None,
                resolved_at: None,
                resolved_by: None,
                resolution_notes: None,
            };
            self.alerts.insert(alert.id, alert.clone());
            self.open.insert(key, alert.id);
            alert
        };

        info!(
            alert_id = %alert.id, product_id = %product.id,
            warehouse_id = %level.warehouse_id,
            alert_type = %alert.alert_type, severity = %alert.severity,
            "Stock alert raised"
        );
        batch.stage(Event::StockAlertRaised {
            alert_id: alert.id,
            product_id: product.id,
            warehouse_id: level.warehouse_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            current_quantity: alert.current_quantity,
            threshold_quantity: alert.threshold_quantity,
            occurred_at: Utc::now(),
        });
        if alert.alert_type == StockAlertType::BelowReorderPoint {
            batch.stage(Event::ProductReorderPointReached {
                product_id: product.id,
                warehouse_id: level.warehouse_id,
                current_quantity: level.quantity_available(),
                total_quantity: level.quantity_on_hand,
                reorder_point: product.reorder_point,
                reorder_quantity: product.reorder_quantity,
                occurred_at: Utc::now(),
            });
        }
    }

    fn open_id_for_pair(&self, product_id: Uuid, warehouse_id: Uuid) -> Option<Uuid> {
        self.open
            .iter()
            .find(|entry| entry.key().0 == product_id && entry.key().1 == warehouse_id)
            .map(|entry| *entry.value())
    }

    fn resolve_recovered(&self, product_id: Uuid, warehouse_id: Uuid) {
        while let Some(id) = self.open_id_for_pair(product_id, warehouse_id) {
            self.open
                .retain(|(p, w, _), v| !(*p == product_id && *w == warehouse_id && *v == id));
            if let Some(mut alert) = self.alerts.get_mut(&id) {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(Utc::now());
                alert.resolved_by = Some("system".to_string());
                alert.resolution_notes = Some("Stock recovered above thresholds".to_string());
                alert.updated_at = Utc::now();
                info!(alert_id = %id, %product_id, %warehouse_id, "Stock alert auto-resolved");
            }
        }
    }

    pub fn alert(&self, alert_id: Uuid) -> Option<StockAlert> {
        self.alerts.get(&alert_id).map(|a| a.clone())
    }

    /// Open alerts, optionally narrowed by product and/or warehouse,
    /// ordered most severe first.
    pub fn open_alerts(
        &self,
        product_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> Vec<StockAlert> {
        let mut result: Vec<StockAlert> = self
            .alerts
            .iter()
            .filter(|a| a.is_open())
            .filter(|a| product_id.map_or(true, |p| a.product_id == p))
            .filter(|a| warehouse_id.map_or(true, |w| a.warehouse_id == w))
            .map(|a| a.clone())
            .collect();
        result.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.created_at.cmp(&b.created_at)));
        result
    }

    #[instrument(skip(self))]
    pub fn acknowledge(&self, alert_id: Uuid, user: &str) -> Result<StockAlert, InventoryError> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(InventoryError::AlertNotFound(alert_id))?;
        if alert.status != AlertStatus::New {
            return Err(InventoryError::invalid_op(format!(
                "alert {} cannot be acknowledged from status {}",
                alert_id, alert.status
            )));
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(user.to_string());
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    #[instrument(skip(self))]
    pub fn start_progress(&self, alert_id: Uuid) -> Result<StockAlert, InventoryError> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(InventoryError::AlertNotFound(alert_id))?;
        if alert.status != AlertStatus::Acknowledged {
            return Err(InventoryError::invalid_op(format!(
                "alert {} must be acknowledged before work starts (status {})",
                alert_id, alert.status
            )));
        }
        alert.status = AlertStatus::InProgress;
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    #[instrument(skip(self, notes))]
    pub fn resolve(
        &self,
        alert_id: Uuid,
        user: &str,
        notes: Option<String>,
    ) -> Result<StockAlert, InventoryError> {
        self.close(alert_id, AlertStatus::Resolved, user, notes)
    }

    #[instrument(skip(self))]
    pub fn ignore(&self, alert_id: Uuid, user: &str) -> Result<StockAlert, InventoryError> {
        self.close(alert_id, AlertStatus::Ignored, user, None)
    }

    fn close(
        &self,
        alert_id: Uuid,
        terminal: AlertStatus,
        user: &str,
        notes: Option<String>,
    ) -> Result<StockAlert, InventoryError> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(InventoryError::AlertNotFound(alert_id))?;
        if !alert.status.is_open() {
            return Err(InventoryError::invalid_op(format!(
                "alert {} is already closed (status {})",
                alert_id, alert.status
            )));
        }
        alert.status = terminal;
        alert.resolved_at = Some(Utc::now());
        alert.resolved_by = Some(user.to_string());
        alert.resolution_notes = notes;
        alert.updated_at = Utc::now();
        self.open
            .retain(|(_, _, _), v| *v != alert_id);
        Ok(alert.clone())
    }
}

impl Default for ThresholdMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn alert_message(product: &Product, breach: &Breach) -> String {
    match breach.alert_type {
        StockAlertType::LowStock => format!(
            "{} on-hand {} is below minimum stock level {}",
            product.sku, breach.current, breach.threshold
        ),
        StockAlertType::BelowReorderPoint => format!(
            "{} available {} is at or below reorder point {}",
            product.sku, breach.current, breach.threshold
        ),
        StockAlertType::Overstock => format!(
            "{} on-hand {} exceeds maximum stock level {}",
            product.sku, breach.current, breach.threshold
        ),
        StockAlertType::NegativeStock => format!(
            "{} quantity {} is negative; data integrity defect",
            product.sku, breach.current
        ),
        StockAlertType::NoMovement => format!("{} has had no recent movement", product.sku),
    }
}
