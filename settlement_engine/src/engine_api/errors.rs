use thiserror::Error;

use crate::{
    db_types::{Container, LineId, MerchantId, OrderId},
    fees::FeeError,
    traits::{GatewayError, NotifyError, StoreError},
};

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("No customer exists with email {0}")]
    CustomerNotFound(String),
    #[error("Merchant {0} does not exist")]
    MerchantNotFound(MerchantId),
    #[error("Merchant {0} has no payout account")]
    MerchantAccountMissing(MerchantId),
    #[error("{container}/{id} does not exist")]
    DocumentNotFound { container: Container, id: String },
    #[error("Line {line} of order {order} has no reference, and neither does the order")]
    UnresolvedReference { order: OrderId, line: LineId },
    #[error("Event {event} is still being applied to order {order} by another delivery")]
    FollowUpInProgress { order: OrderId, event: String },
    #[error("Gave up on {container}/{id} after {attempts} concurrent modifications")]
    Contention { container: Container, id: String, attempts: usize },
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("Fee decomposition failed. {0}")]
    Fees(#[from] FeeError),
    #[error("{0}")]
    Notify(#[from] NotifyError),
    #[error("{0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
