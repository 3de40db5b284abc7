//! Stock adjustments for product variants and tour ticket types.
//!
//! Product variants keep their levels in the `inventory` container. Tour ticket types keep theirs inside the parent
//! listing, under `ticket_types[@variant].inventory`, so adjusting a ticket writes through to the listing.
//!
//! Quantities never go below zero. An adjustment that would take them negative is clamped and logged; it is a sign
//! of bad data upstream, not a reason to fail the event.
use std::fmt::Display;

use chrono::Utc;
use log::*;
use serde_json::{json, Value};

use crate::{
    db_types::{
        AdjustmentReason,
        Alert,
        AlertKind,
        Booking,
        Container,
        DocRef,
        InventoryLevels,
        InventoryTransaction,
        OrderId,
        VariantId,
    },
    engine_api::{
        errors::EngineError,
        support::{fetch_parsed, patch_with_retry},
    },
    patch::{DocPath, PatchOp},
    traits::{Document, DocumentStore, StoreError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryLocation {
    Variant(VariantId),
    TourTicket { listing: DocRef, variant: VariantId },
}

impl InventoryLocation {
    pub fn variant(&self) -> &VariantId {
        match self {
            InventoryLocation::Variant(v) => v,
            InventoryLocation::TourTicket { variant, .. } => variant,
        }
    }

    fn doc_ref(&self) -> DocRef {
        match self {
            InventoryLocation::Variant(v) => DocRef::own_partition(Container::Inventory, v.as_str()),
            InventoryLocation::TourTicket { listing, .. } => listing.clone(),
        }
    }

    fn levels_path(&self) -> DocPath {
        match self {
            InventoryLocation::Variant(_) => DocPath::root().key("levels"),
            InventoryLocation::TourTicket { variant, .. } => {
                DocPath::root().key("ticket_types").id(variant).key("inventory")
            },
        }
    }

    fn read_levels(&self, doc: &Document) -> Result<InventoryLevels, EngineError> {
        let pointer = match self {
            InventoryLocation::Variant(_) => "/levels".to_string(),
            InventoryLocation::TourTicket { variant, .. } => {
                let is_variant = |t: &Value| t.get("id").and_then(Value::as_str) == Some(variant.as_str());
                let index = doc
                    .body
                    .get("ticket_types")
                    .and_then(|t| t.as_array())
                    .and_then(|t| t.iter().position(is_variant))
                    .ok_or_else(|| EngineError::DocumentNotFound {
                        container: Container::Listings,
                        id: format!("{}/ticket_types/{variant}", doc.id),
                    })?;
                format!("/ticket_types/{index}/inventory")
            },
        };
        let levels = match doc.body.pointer(&pointer) {
            Some(v) => serde_json::from_value(v.clone())?,
            None => InventoryLevels::default(),
        };
        Ok(levels)
    }
}

impl Display for InventoryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryLocation::Variant(v) => write!(f, "variant {v}"),
            InventoryLocation::TourTicket { listing, variant } => write!(f, "ticket type {variant} on {}", listing.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub variant: VariantId,
    pub before: InventoryLevels,
    pub after: InventoryLevels,
    /// True if the result was clamped at zero
    pub clamped: bool,
    pub alert: Option<AlertKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    Applied(Adjustment),
    /// The item does not track stock.
    Untracked,
}

fn clamp(location: &InventoryLocation, field: &str, value: i64) -> (i64, bool) {
    if value < 0 {
        warn!("📦️ {field} for {location} would drop to {value}. Clamping at zero.");
        (0, true)
    } else {
        (value, false)
    }
}

pub struct InventoryApi<S> {
    store: S,
    retries: usize,
}

impl<S: DocumentStore> InventoryApi<S> {
    pub fn new(store: S, retries: usize) -> Self {
        Self { store, retries }
    }

    /// Records a sale: lowers both on-hand and committed quantities by `qty`.
    pub async fn decrement(
        &self,
        location: &InventoryLocation,
        qty: u32,
        reason: AdjustmentReason,
        source_order: &OrderId,
        actor: &str,
    ) -> Result<AdjustmentOutcome, EngineError> {
        let qty = i64::from(qty);
        self.adjust(location, -qty, -qty, reason, source_order, actor).await
    }

    /// Puts `qty` units back on hand.
    pub async fn restore(
        &self,
        location: &InventoryLocation,
        qty: u32,
        reason: AdjustmentReason,
        source_order: &OrderId,
        actor: &str,
    ) -> Result<AdjustmentOutcome, EngineError> {
        self.adjust(location, i64::from(qty), 0, reason, source_order, actor).await
    }

    /// Finds the ticket type a booked ticket belongs to. Booking → session → ticket → variant, on the booking's
    /// listing.
    pub async fn resolve_tour_ticket(
        &self,
        booking_ref: &DocRef,
        session_id: &str,
        ticket_id: &str,
    ) -> Result<InventoryLocation, EngineError> {
        let (_, booking) = fetch_parsed::<_, Booking>(&self.store, booking_ref).await?;
        let ticket = booking.ticket(session_id, ticket_id).ok_or_else(|| EngineError::DocumentNotFound {
            container: Container::Bookings,
            id: format!("{}/sessions/{session_id}/tickets/{ticket_id}", booking.id),
        })?;
        Ok(InventoryLocation::TourTicket { listing: booking.listing.clone(), variant: ticket.variant_id.clone() })
    }

    async fn adjust(
        &self,
        location: &InventoryLocation,
        on_hand_delta: i64,
        committed_delta: i64,
        reason: AdjustmentReason,
        source_order: &OrderId,
        actor: &str,
    ) -> Result<AdjustmentOutcome, EngineError> {
        let mut computed = None;
        let path = location.levels_path();
        patch_with_retry(&self.store, &location.doc_ref(), actor, self.retries, |doc| {
            computed = None;
            let before = location.read_levels(doc)?;
            if !before.track {
                return Ok(vec![]);
            }
            let (qty_on_hand, c1) = clamp(location, "qty_on_hand", before.qty_on_hand + on_hand_delta);
            let (qty_committed, c2) = clamp(location, "qty_committed", before.qty_committed + committed_delta);
            let after = InventoryLevels { qty_on_hand, qty_committed, ..before.clone() };
            let ops = vec![
                PatchOp::set(path.clone().key("qty_on_hand"), json!(qty_on_hand)),
                PatchOp::set(path.clone().key("qty_committed"), json!(qty_committed)),
            ];
            computed = Some((before, after, c1 || c2));
            Ok(ops)
        })
        .await?;
        let Some((before, after, clamped)) = computed else {
            debug!("📦️ {location} does not track inventory. Nothing to do.");
            return Ok(AdjustmentOutcome::Untracked);
        };
        let variant = location.variant().clone();
        info!(
            "📦️ {location}: on hand {} → {}, committed {} → {} ({reason} for order {source_order})",
            before.qty_on_hand, after.qty_on_hand, before.qty_committed, after.qty_committed
        );
        self.write_ledger_row(&variant, &before, &after, reason, source_order, actor).await?;
        let alert = self.raise_alert(&variant, &after, actor).await;
        Ok(AdjustmentOutcome::Applied(Adjustment { variant, before, after, clamped, alert }))
    }

    async fn write_ledger_row(
        &self,
        variant: &VariantId,
        before: &InventoryLevels,
        after: &InventoryLevels,
        reason: AdjustmentReason,
        source_order: &OrderId,
        actor: &str,
    ) -> Result<(), EngineError> {
        let at = Utc::now();
        let row = InventoryTransaction {
            id: format!("{variant}:{}:{:08x}", at.timestamp_micros(), rand::random::<u32>()),
            variant_id: variant.clone(),
            delta: after.qty_on_hand - before.qty_on_hand,
            on_hand_before: before.qty_on_hand,
            on_hand_after: after.qty_on_hand,
            committed_before: before.qty_committed,
            committed_after: after.qty_committed,
            reason,
            source_order: source_order.clone(),
            at,
        };
        let body = serde_json::to_value(&row)?;
        self.store.insert(Container::InventoryTransactions, body, variant.as_str(), actor).await?;
        Ok(())
    }

    /// Opens an alert if the new levels call for one. Only one alert per variant, kind and day is ever created.
    async fn raise_alert(&self, variant: &VariantId, levels: &InventoryLevels, actor: &str) -> Option<AlertKind> {
        let kind = levels.alert_kind()?;
        let alert = Alert::open(variant, kind, levels);
        let body = match serde_json::to_value(&alert) {
            Ok(b) => b,
            Err(e) => {
                error!("📦️ Could not serialize {kind} alert for {variant}: {e}");
                return Some(kind);
            },
        };
        match self.store.insert(Container::Alerts, body, variant.as_str(), actor).await {
            Ok(_) => info!("📦️ Opened {kind} alert {} ({} available)", alert.id, alert.available),
            Err(StoreError::AlreadyExists { .. }) => debug!("📦️ {kind} alert {} is already open", alert.id),
            Err(e) => error!("📦️ Could not open {kind} alert for {variant}: {e}"),
        }
        Some(kind)
    }
}
