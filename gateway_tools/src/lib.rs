mod api;
mod config;
mod error;

mod data_objects;
pub mod helpers;

pub use api::StripeApi;
pub use config::GatewayConfig;
pub use data_objects::{
    Expandable,
    StripeBalanceTransaction,
    StripeCardDetails,
    StripeCharge,
    StripeFeeDetail,
    StripeList,
    StripePaymentMethodDetails,
    StripeRefund,
    StripeRefundDestination,
    StripeTransfer,
    TransferRequest,
};
pub use error::GatewayApiError;
