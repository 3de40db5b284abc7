//! Marketplace Settlement Engine
//!
//! The settlement engine consumes payment-gateway events (charge captured, charge refunded) and evolves orders and
//! the documents they pay for into a consistent state. It computes the fee breakdown of every payment, keeps
//! inventory in step with sales and refunds, and emits notifications along the way.
//!
//! The library is divided into these main sections:
//! 1. The data model ([`mod@db_types`]) and the ordered-patch engine ([`mod@patch`]) that every write goes through.
//! 2. The backend contracts ([`mod@traits`]): the document store, the payment gateway and the notifier. A SQLite
//!    document store is provided behind the `sqlite` feature.
//! 3. The public API ([`mod@engine_api`]): settlement, refunds and inventory.
//!
//! The engine also emits events when an order is paid or refunded. A simple actor framework ([`mod@events`]) lets
//! you hook into these and perform custom actions.
pub mod db_types;
pub mod engine_api;
pub mod events;
pub mod fees;
pub mod gateway_types;
pub mod helpers;
pub mod patch;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use engine_api::{
    config::EngineConfig,
    effects::{EffectKind, EffectLog, EffectRecord, EffectStatus},
    errors::EngineError,
    inventory_api::{AdjustmentOutcome, InventoryApi, InventoryLocation},
    receipts::{CreditedRefund, RefundReceipt, SettlementReceipt},
    refund_api::RefundApi,
    settlement_api::SettlementApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{db::db_url, SqliteDocumentStore};
