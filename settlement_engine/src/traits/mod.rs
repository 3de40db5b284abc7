//! # Backend and collaborator contracts
//!
//! The engine never talks to a database, a payment gateway or a push/email service directly. It works against the
//! traits in this module, and the server (or the test harness) supplies the implementations.
//!
//! * [`DocumentStore`] is the document database: keyed reads, predicate queries, inserts, and ordered patches with
//!   optimistic versioning. [`crate::SqliteDocumentStore`] is the bundled backend.
//! * [`PaymentGateway`] retrieves charges and refunds and creates transfers to connected merchant accounts.
//! * [`Notifier`] publishes real-time notifications and sends templated emails. Delivery is fire-and-forget.
mod data_objects;
mod document_store;
mod notifier;
mod payment_gateway;

pub use data_objects::{Document, Predicate, Scope};
pub use document_store::{DocumentStore, StoreError};
pub use notifier::{Audience, NotifyAction, NotifyError, Notifier, PublishOptions};
pub use payment_gateway::{GatewayError, PaymentGateway};
