//! Gateway-facing data: the charge and refund objects the engine asks the gateway for, and the two inbound events it
//! handles.
use chrono::{DateTime, Utc};
use mkt_common::Cents;
use serde::{Deserialize, Serialize};

use crate::db_types::{Currency, MerchantId, OrderId, PaymentMethod};

//--------------------------------------     Gateway objects   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeDetails {
    pub id: String,
    pub amount: Cents,
    pub currency: Currency,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub balance_transaction: Option<BalanceTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub amount: Cents,
    pub fee: Cents,
    pub net: Cents,
    #[serde(default)]
    pub fee_details: Vec<FeeDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeDetailKind {
    StripeFee,
    Tax,
    ApplicationFee,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDetail {
    #[serde(rename = "type")]
    pub kind: FeeDetailKind,
    pub amount: Cents,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
    RequiresAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDetails {
    pub id: String,
    pub amount: Cents,
    pub currency: Currency,
    pub status: RefundStatus,
    #[serde(default)]
    pub destination: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub amount: Cents,
    pub currency: Currency,
    /// The connected account receiving the funds
    pub destination: String,
    pub transfer_group: String,
    pub source_transaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: String,
    pub amount: Cents,
    pub destination: String,
}

//--------------------------------------     Inbound events    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeCaptured {
    pub event_id: String,
    pub charge_id: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    pub metadata: CaptureMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub order_id: OrderId,
    pub customer_email: String,
    pub merchant_id: MerchantId,
    /// The order's total tax, shipping tax included.
    #[serde(default)]
    pub tax_amount: Cents,
    #[serde(default)]
    pub shipping: Option<ShippingMetadata>,
    /// The connected account the charge was made on, if any.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMetadata {
    pub subtotal: Cents,
    #[serde(default)]
    pub tax: Cents,
    #[serde(default)]
    pub fee: Cents,
    #[serde(default)]
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRefunded {
    pub event_id: String,
    pub charge_id: String,
    #[serde(default)]
    pub account: Option<String>,
    pub metadata: RefundMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundMetadata {
    pub order_id: OrderId,
    pub customer_email: String,
}
