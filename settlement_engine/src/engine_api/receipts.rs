use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Credit, LineId, OrderId, PaidStatus, Payment},
    engine_api::effects::{EffectLog, EffectRecord},
};

/// What a settlement did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub order_id: OrderId,
    /// The gateway event, for capture settlements
    pub event_id: Option<String>,
    /// True if the event had already been processed and nothing was done.
    pub duplicate: bool,
    /// The lines that this call moved to PAID
    pub lines: Vec<LineId>,
    /// The payment recorded by this call. `None` for free settlements and replays.
    pub payment: Option<Payment>,
    /// True if every line of the order is now paid
    pub fully_settled: bool,
    pub effects: Vec<EffectRecord>,
}

impl SettlementReceipt {
    pub fn duplicate(order_id: &OrderId, event_id: &str) -> Self {
        Self {
            order_id: order_id.clone(),
            event_id: Some(event_id.to_string()),
            duplicate: true,
            lines: vec![],
            payment: None,
            fully_settled: false,
            effects: vec![],
        }
    }

    pub(crate) fn new(order_id: &OrderId, event_id: Option<&str>, effects: EffectLog) -> Self {
        Self {
            order_id: order_id.clone(),
            event_id: event_id.map(String::from),
            duplicate: false,
            lines: vec![],
            payment: None,
            fully_settled: false,
            effects: effects.into_records(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditedRefund {
    pub refund_id: String,
    pub classification: PaidStatus,
    pub credit: Credit,
    pub lines: Vec<LineId>,
}

/// What a refund event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub order_id: OrderId,
    pub event_id: String,
    pub duplicate: bool,
    pub credited: Vec<CreditedRefund>,
    /// Succeeded refunds that matched no pending price-log entry, typically because they were credited earlier
    pub unmatched: Vec<String>,
    pub effects: Vec<EffectRecord>,
}

impl RefundReceipt {
    pub fn duplicate(order_id: &OrderId, event_id: &str) -> Self {
        Self {
            order_id: order_id.clone(),
            event_id: event_id.to_string(),
            duplicate: true,
            credited: vec![],
            unmatched: vec![],
            effects: vec![],
        }
    }
}
