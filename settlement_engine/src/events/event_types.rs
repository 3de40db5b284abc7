use serde::{Deserialize, Serialize};

use crate::db_types::{Credit, LineId, MerchantId, Order, OrderId, PaidStatus, Payment};

/// A capture (or a free settlement) has been applied to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettledEvent {
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    /// `None` for free settlements
    pub payment: Option<Payment>,
    pub lines: Vec<LineId>,
}

/// Every line of the order is now paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettledEvent {
    pub order: Order,
}

impl OrderSettledEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundProcessedEvent {
    pub order_id: OrderId,
    pub charge_id: String,
    pub credits: Vec<Credit>,
    /// The classification of each credited refund, in the same order as `credits`
    pub classifications: Vec<PaidStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentSettled(PaymentSettledEvent),
    OrderSettled(OrderSettledEvent),
    RefundProcessed(RefundProcessedEvent),
}
