//! # Settlement engine public API
//!
//! The `engine_api` module exposes the programmatic API of the settlement engine. Each API is built from a
//! [`DocumentStore`](crate::traits::DocumentStore) backend plus whichever collaborators it needs.
//!
//! * [`settlement_api`] applies captured charges (and free settlements) to orders.
//! * [`refund_api`] turns succeeded gateway refunds into credits.
//! * [`inventory_api`] keeps stock levels, the inventory transaction ledger and stock alerts.
//!
//! The other submodules hold configuration, errors, and the receipts and effect records the APIs return. Work that
//! is still owed after an event's commit is tracked on the order by `follow_up`.
//!
//! # API usage
//!
//! ```rust,ignore
//! use settlement_engine::{EngineConfig, SettlementApi, SqliteDocumentStore};
//! let store = SqliteDocumentStore::new_with_url("sqlite://data/marketplace.db", 25).await?;
//! let api = SettlementApi::new(store, gateway, notifier, EngineConfig::from_env_or_default(), producers);
//! let receipt = api.settle_capture(&event).await?;
//! ```

pub mod config;
pub mod effects;
pub mod errors;
pub(crate) mod follow_up;
pub mod inventory_api;
pub mod receipts;
pub mod refund_api;
pub mod settlement_api;
pub mod support;
