//! Plumbing shared by the settlement, refund and inventory APIs.
use chrono::Utc;
use log::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    db_types::{Container, DocRef, Order, OrderId, ProcessedEvent},
    engine_api::errors::EngineError,
    patch::PatchOp,
    traits::{Document, DocumentStore, StoreError},
};

/// The result of [`patch_with_retry`].
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// The document as it stands after the call.
    pub document: Document,
    /// False when the builder decided there was nothing to do.
    pub applied: bool,
}

/// Reads a document, asks `build` for the ops to apply to it, and applies them against the version that was read.
///
/// If another writer got in first, the document is re-read and `build` is called again, up to `retries` extra
/// times. `build` must therefore derive everything from the document it is given. An empty op list means there is
/// nothing to do, and nothing is written.
pub async fn patch_with_retry<S, F>(
    store: &S,
    doc_ref: &DocRef,
    actor: &str,
    retries: usize,
    mut build: F,
) -> Result<PatchOutcome, EngineError>
where
    S: DocumentStore,
    F: FnMut(&Document) -> Result<Vec<PatchOp>, EngineError>,
{
    let DocRef { id, partition, container } = doc_ref;
    for attempt in 0..=retries {
        let document = fetch_required(store, doc_ref).await?;
        let ops = build(&document)?;
        if ops.is_empty() {
            trace!("🗃️ Nothing to patch on {doc_ref}");
            return Ok(PatchOutcome { document, applied: false });
        }
        trace!("🗃️ Patching {doc_ref} at version {}: {ops:?}", document.version);
        match store.apply_ordered_patch(*container, id, partition, &ops, actor, Some(document.version)).await {
            Ok(document) => return Ok(PatchOutcome { document, applied: true }),
            Err(StoreError::VersionConflict { found, .. }) => {
                debug!("🗃️ {doc_ref} moved on to version {found} (attempt {}). Recomputing patch.", attempt + 1);
            },
            Err(e) => return Err(e.into()),
        }
    }
    warn!("🗃️ Giving up on {doc_ref} after {} attempts", retries + 1);
    Err(EngineError::Contention { container: *container, id: id.clone(), attempts: retries + 1 })
}

pub async fn fetch_required<S: DocumentStore>(store: &S, doc_ref: &DocRef) -> Result<Document, EngineError> {
    store
        .get_by_id(doc_ref.container, &doc_ref.id, &doc_ref.partition)
        .await?
        .ok_or_else(|| EngineError::DocumentNotFound { container: doc_ref.container, id: doc_ref.id.clone() })
}

pub async fn fetch_parsed<S: DocumentStore, T: DeserializeOwned>(
    store: &S,
    doc_ref: &DocRef,
) -> Result<(Document, T), EngineError> {
    let doc = fetch_required(store, doc_ref).await?;
    let value = doc.parse::<T>()?;
    Ok((doc, value))
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    Ok(serde_json::to_value(value)?)
}

pub fn order_ref(order_id: &OrderId) -> DocRef {
    DocRef::own_partition(Container::Orders, order_id.as_str())
}

pub async fn fetch_order<S: DocumentStore>(store: &S, order_id: &OrderId) -> Result<(Document, Order), EngineError> {
    match fetch_parsed(store, &order_ref(order_id)).await {
        Err(EngineError::DocumentNotFound { .. }) => Err(EngineError::OrderNotFound(order_id.clone())),
        other => other,
    }
}

//--------------------------------------  Processed-event ledger  ------------------------------------------------------
fn ledger_ref(event_id: &str) -> DocRef {
    DocRef::own_partition(Container::ProcessedEvents, event_id)
}

pub async fn is_processed<S: DocumentStore>(store: &S, event_id: &str) -> Result<bool, EngineError> {
    let r = ledger_ref(event_id);
    Ok(store.exists_by_id(r.container, &r.id, &r.partition).await?)
}

/// Marks the gateway event as fully handled. Recording the same event twice is not an error.
pub async fn record_processed<S: DocumentStore>(
    store: &S,
    event_id: &str,
    kind: &str,
    order_id: &OrderId,
    actor: &str,
) -> Result<(), EngineError> {
    let entry = ProcessedEvent {
        id: event_id.to_string(),
        kind: kind.to_string(),
        order_id: order_id.clone(),
        processed_at: Utc::now(),
    };
    let body = serde_json::to_value(&entry)?;
    match store.insert(Container::ProcessedEvents, body, event_id, actor).await {
        Ok(_) => {
            debug!("🧾️ Event {event_id} ({kind}) recorded as processed");
            Ok(())
        },
        Err(StoreError::AlreadyExists { .. }) => {
            debug!("🧾️ Event {event_id} was already recorded as processed");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}
