use gateway_tools::{
    helpers::{from_unix_timestamp, gateway_currency},
    GatewayApiError,
    StripeApi,
    StripeBalanceTransaction,
    StripeCharge,
    StripeRefund,
    TransferRequest,
};
use log::*;
use mkt_common::Cents;
use settlement_engine::{
    db_types::{Currency, PaymentMethod},
    gateway_types::{
        BalanceTransaction,
        ChargeDetails,
        FeeDetail,
        FeeDetailKind,
        NewTransfer,
        RefundDetails,
        RefundStatus,
        TransferReceipt,
    },
    traits::{GatewayError, PaymentGateway},
};

/// [`PaymentGateway`] backed by the gateway's REST API.
#[derive(Clone)]
pub struct StripeGateway {
    api: StripeApi,
}

impl StripeGateway {
    pub fn new(api: StripeApi) -> Self {
        Self { api }
    }
}

impl PaymentGateway for StripeGateway {
    async fn retrieve_charge(&self, charge_id: &str, account: Option<&str>) -> Result<ChargeDetails, GatewayError> {
        let charge = self.api.retrieve_charge(charge_id, account).await.map_err(|e| gateway_error(charge_id, e))?;
        charge_details(charge)
    }

    async fn list_refunds(&self, charge_id: &str, account: Option<&str>) -> Result<Vec<RefundDetails>, GatewayError> {
        let refunds = self.api.list_refunds(charge_id, account).await.map_err(|e| gateway_error(charge_id, e))?;
        refunds.into_iter().map(refund_details).collect()
    }

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<TransferReceipt, GatewayError> {
        let request = TransferRequest {
            amount: transfer.amount.value(),
            currency: gateway_currency(transfer.currency.as_str()),
            destination: transfer.destination,
            transfer_group: transfer.transfer_group,
            source_transaction: transfer.source_transaction,
        };
        let result = self.api.create_transfer(&request).await.map_err(|e| gateway_error(&request.destination, e))?;
        Ok(TransferReceipt { id: result.id, amount: Cents::from(result.amount), destination: result.destination })
    }
}

fn gateway_error(subject: &str, e: GatewayApiError) -> GatewayError {
    if e.is_not_found() {
        return GatewayError::NotFound(subject.to_string());
    }
    if e.is_transient() {
        warn!("💳️ Gateway call for {subject} failed and may be retried. {e}");
        return GatewayError::Unavailable(e.to_string());
    }
    match e {
        GatewayApiError::QueryError { .. } => GatewayError::Rejected(e.to_string()),
        GatewayApiError::Initialization(_) | GatewayApiError::RestRequestError(_) => {
            GatewayError::Rejected(e.to_string())
        },
        _ => GatewayError::InvalidResponse(e.to_string()),
    }
}

pub fn charge_details(charge: StripeCharge) -> Result<ChargeDetails, GatewayError> {
    let invalid = |e: GatewayApiError| GatewayError::InvalidResponse(e.to_string());
    let balance_transaction = match charge.balance_transaction {
        Some(txn) => Some(balance_transaction(txn.expanded("balance_transaction").map_err(invalid)?)),
        None => None,
    };
    let payment_method = charge.payment_method_details.map(|d| {
        let (brand, last4) = d.card.map(|c| (c.brand, c.last4)).unwrap_or_default();
        PaymentMethod { kind: d.kind, brand, last4 }
    });
    Ok(ChargeDetails {
        id: charge.id,
        amount: Cents::from(charge.amount),
        currency: Currency::new(&charge.currency),
        payment_intent_id: charge.payment_intent,
        payment_method,
        balance_transaction,
    })
}

fn balance_transaction(txn: StripeBalanceTransaction) -> BalanceTransaction {
    let fee_details = txn
        .fee_details
        .into_iter()
        .map(|d| FeeDetail {
            kind: fee_detail_kind(&d.kind),
            amount: Cents::from(d.amount),
            currency: Currency::new(&d.currency),
        })
        .collect();
    BalanceTransaction {
        id: txn.id,
        amount: Cents::from(txn.amount),
        fee: Cents::from(txn.fee),
        net: Cents::from(txn.net),
        fee_details,
    }
}

pub fn fee_detail_kind(kind: &str) -> FeeDetailKind {
    match kind {
        "stripe_fee" => FeeDetailKind::StripeFee,
        "tax" => FeeDetailKind::Tax,
        "application_fee" => FeeDetailKind::ApplicationFee,
        _ => FeeDetailKind::Other,
    }
}

pub fn refund_status(status: &str) -> Result<RefundStatus, GatewayError> {
    match status {
        "pending" => Ok(RefundStatus::Pending),
        "succeeded" => Ok(RefundStatus::Succeeded),
        "failed" => Ok(RefundStatus::Failed),
        "canceled" => Ok(RefundStatus::Canceled),
        "requires_action" => Ok(RefundStatus::RequiresAction),
        other => Err(GatewayError::InvalidResponse(format!("Unknown refund status '{other}'"))),
    }
}

pub fn refund_details(refund: StripeRefund) -> Result<RefundDetails, GatewayError> {
    let created = from_unix_timestamp(refund.created).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    Ok(RefundDetails {
        status: refund_status(&refund.status)?,
        destination: refund.destination(),
        amount: Cents::from(refund.amount),
        currency: Currency::new(&refund.currency),
        id: refund.id,
        created,
    })
}
