//! SQLite backend for the settlement engine's document store.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDocumentStore;
