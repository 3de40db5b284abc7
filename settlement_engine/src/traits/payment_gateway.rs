use thiserror::Error;

use crate::gateway_types::{ChargeDetails, NewTransfer, RefundDetails, TransferReceipt};

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The gateway could not be reached: {0}")]
    Unavailable(String),
    #[error("The gateway rejected the request: {0}")]
    Rejected(String),
    #[error("{0} does not exist on the gateway")]
    NotFound(String),
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// The payment processor. All calls are made on behalf of a connected merchant account when `account` is given.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Clone {
    /// Fetches a charge with its balance transaction expanded.
    async fn retrieve_charge(&self, charge_id: &str, account: Option<&str>) -> Result<ChargeDetails, GatewayError>;

    async fn list_refunds(&self, charge_id: &str, account: Option<&str>) -> Result<Vec<RefundDetails>, GatewayError>;

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<TransferReceipt, GatewayError>;
}
