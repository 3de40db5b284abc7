use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GatewayApiError;

/// A related object that the gateway returns as a bare id unless it was asked to expand it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Object(o) => Some(o),
            Expandable::Id(_) => None,
        }
    }

    pub fn expanded(self, field: &str) -> Result<T, GatewayApiError> {
        match self {
            Expandable::Object(o) => Ok(*o),
            Expandable::Id(id) => Err(GatewayApiError::NotExpanded(format!("{field} ({id})"))),
        }
    }
}

/// A page of results from a list endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCharge {
    pub id: String,
    /// Amount in the currency's smallest unit
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub captured: bool,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_method_details: Option<StripePaymentMethodDetails>,
    #[serde(default)]
    pub balance_transaction: Option<Expandable<StripeBalanceTransaction>>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentMethodDetails {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub card: Option<StripeCardDetails>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCardDetails {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub last4: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeBalanceTransaction {
    pub id: String,
    pub amount: i64,
    pub fee: i64,
    pub net: i64,
    pub currency: String,
    #[serde(default)]
    pub fee_details: Vec<StripeFeeDetail>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeFeeDetail {
    pub amount: i64,
    pub currency: String,
    /// `stripe_fee`, `tax` or `application_fee`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeRefund {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub charge: Option<String>,
    /// Unix timestamp, seconds
    pub created: i64,
    #[serde(default)]
    pub destination_details: Option<StripeRefundDestination>,
}

impl StripeRefund {
    /// The reference the customer's bank sees for the refund, falling back to the destination type.
    pub fn destination(&self) -> Option<String> {
        let details = self.destination_details.as_ref()?;
        let reference = details.card.as_ref().and_then(|c| c.get("reference")).and_then(Value::as_str);
        reference.map(String::from).or_else(|| details.kind.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeRefundDestination {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub card: Option<Value>,
}

/// Moves funds from the platform balance to a connected account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferRequest {
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    pub transfer_group: String,
    /// The charge the funds come from. The transfer waits for those funds to become available.
    pub source_transaction: String,
}

impl TransferRequest {
    /// Transfers are keyed on what they pay for, so a repeated request cannot move funds twice.
    pub fn idempotency_key(&self) -> String {
        format!("transfer:{}:{}:{}", self.source_transaction, self.destination, self.transfer_group)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeTransfer {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    #[serde(default)]
    pub transfer_group: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expanded_charge() {
        let json = include_str!("./test_assets/charge1.json");
        let charge: StripeCharge = serde_json::from_str(json).unwrap();
        assert_eq!(charge.id, "ch_3PxAbC2eZvKYlo2C0n1xYz9Q");
        assert_eq!(charge.amount, 5400);
        assert!(charge.captured);
        assert_eq!(charge.metadata["order_id"], "O1");
        let card = charge.payment_method_details.as_ref().and_then(|d| d.card.as_ref()).unwrap();
        assert_eq!(card.last4.as_deref(), Some("4242"));
        let txn = charge.balance_transaction.unwrap().expanded("balance_transaction").unwrap();
        assert_eq!((txn.amount, txn.fee, txn.net), (5400, 187, 5213));
        let kinds = txn.fee_details.iter().map(|d| d.kind.as_str()).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["stripe_fee", "tax"]);
    }

    #[test]
    fn unexpanded_balance_transaction() {
        let json = r#"{"id": "ch_1", "amount": 100, "currency": "usd", "balance_transaction": "txn_1"}"#;
        let charge: StripeCharge = serde_json::from_str(json).unwrap();
        let txn = charge.balance_transaction.unwrap();
        assert!(txn.as_object().is_none());
        assert!(matches!(txn.expanded("balance_transaction"), Err(GatewayApiError::NotExpanded(_))));
    }

    #[test]
    fn refund_list() {
        let json = include_str!("./test_assets/refunds1.json");
        let list: StripeList<StripeRefund> = serde_json::from_str(json).unwrap();
        assert_eq!(list.data.len(), 2);
        assert!(!list.has_more);
        assert_eq!(list.data[0].status, "succeeded");
        assert_eq!(list.data[0].destination().as_deref(), Some("ARN1234567890"));
        assert_eq!(list.data[1].destination().as_deref(), Some("card"));
    }

    #[test]
    fn transfer_idempotency_key() {
        let t = TransferRequest {
            amount: 250,
            currency: "usd".into(),
            destination: "acct_1".into(),
            transfer_group: "O1".into(),
            source_transaction: "ch_1".into(),
        };
        assert_eq!(t.idempotency_key(), "transfer:ch_1:acct_1:O1");
    }
}
