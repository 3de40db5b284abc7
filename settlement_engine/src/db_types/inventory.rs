use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{OrderId, VariantId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevels {
    #[serde(default)]
    pub qty_on_hand: i64,
    #[serde(default)]
    pub qty_committed: i64,
    #[serde(default)]
    pub track: bool,
    #[serde(default)]
    pub low_stock_threshold: Option<i64>,
    #[serde(default)]
    pub one_of_a_kind: bool,
}

impl InventoryLevels {
    pub fn available(&self) -> i64 {
        self.qty_on_hand - self.qty_committed
    }

    /// The alert these levels call for, if any. One-of-a-kind items never raise low-stock alerts.
    pub fn alert_kind(&self) -> Option<AlertKind> {
        let available = self.available();
        if available <= 0 {
            return Some(AlertKind::OutOfStock);
        }
        match self.low_stock_threshold {
            Some(threshold) if !self.one_of_a_kind && available <= threshold => Some(AlertKind::LowStock),
            _ => None,
        }
    }
}

/// A product variant's stock record. Partitioned by variant id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: VariantId,
    #[serde(default)]
    pub listing_id: Option<String>,
    pub levels: InventoryLevels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentReason {
    Sale,
    Refund,
}

impl Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjustmentReason::Sale => f.write_str("SALE"),
            AdjustmentReason::Refund => f.write_str("REFUND"),
        }
    }
}

/// One row of the append-only inventory ledger. Partitioned by variant id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: String,
    pub variant_id: VariantId,
    pub delta: i64,
    pub on_hand_before: i64,
    pub on_hand_after: i64,
    pub committed_before: i64,
    pub committed_after: i64,
    pub reason: AdjustmentReason,
    pub source_order: OrderId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    OutOfStock,
    LowStock,
}

impl Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::OutOfStock => f.write_str("OUT_OF_STOCK"),
            AlertKind::LowStock => f.write_str("LOW_STOCK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Resolved,
}

/// A stock alert. At most one exists per variant, kind and calendar day; see [`Alert::id_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub variant_id: VariantId,
    pub kind: AlertKind,
    pub available: i64,
    #[serde(default)]
    pub threshold: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl Alert {
    pub fn id_for(variant: &VariantId, kind: AlertKind, day: NaiveDate) -> String {
        format!("{variant}:{kind}:{}", day.format("%Y-%m-%d"))
    }

    pub fn open(variant: &VariantId, kind: AlertKind, levels: &InventoryLevels) -> Self {
        let now = Utc::now();
        Self {
            id: Self::id_for(variant, kind, now.date_naive()),
            variant_id: variant.clone(),
            kind,
            available: levels.available(),
            threshold: levels.low_stock_threshold,
            opened_at: now,
            status: AlertStatus::Open,
        }
    }
}
