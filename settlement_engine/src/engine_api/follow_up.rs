//! Tracks the work an event still owes on an order after its line changes are committed.
//!
//! The commit patch leaves a [`PendingEffects`] marker in the order's `effects_pending` list. Each side effect that
//! completes is added to the marker's `done` list, and the marker is removed when the event finishes. An event that
//! is redelivered while its marker is still present re-runs only the effects that are not marked done.
//!
//! The marker is claimed by the delivery that wrote it, for a lease. Only the claimant removes the marker. A copy of
//! the event that arrives while the lease is live fails with [`EngineError::FollowUpInProgress`], and the gateway
//! delivers it again later. A failed delivery gives up its lease so that the redelivery can take over at once.
//!
//! An effect and its done mark are separate writes. A crash between the two repeats that one effect on redelivery.
use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use serde_json::{json, Value};

use crate::{
    db_types::{Order, OrderId, PendingEffects},
    engine_api::{
        errors::EngineError,
        support::{order_ref, patch_with_retry, to_json},
    },
    patch::{DocPath, PatchOp},
    traits::DocumentStore,
};

pub(crate) fn marker_path(event_id: &str) -> DocPath {
    DocPath::root().key("effects_pending").id(event_id)
}

/// The op that puts `marker` on an order.
pub(crate) fn add_marker(marker: &PendingEffects) -> Result<PatchOp, EngineError> {
    Ok(PatchOp::add(DocPath::root().key("effects_pending").end(), to_json(marker)?))
}

pub(crate) struct FollowUp<'a, S> {
    store: &'a S,
    order_id: OrderId,
    /// `None` for work that no gateway event is waiting on
    event_id: Option<String>,
    /// Identifies this delivery on the marker
    claim: String,
    lease: chrono::Duration,
    actor: String,
    retries: usize,
    done: HashSet<String>,
}

impl<'a, S: DocumentStore> FollowUp<'a, S> {
    /// Follows `event_id` on `order`, picking up the effects an earlier attempt already carried out.
    pub fn for_event(
        store: &'a S,
        order: &Order,
        event_id: &str,
        actor: &str,
        retries: usize,
        lease: Duration,
    ) -> Self {
        let done = order.pending_effects(event_id).map(|m| m.done.iter().cloned().collect()).unwrap_or_default();
        Self {
            store,
            order_id: order.id.clone(),
            event_id: Some(event_id.to_string()),
            claim: format!("{actor}:{:08x}", rand::random::<u32>()),
            lease: chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365)),
            actor: actor.to_string(),
            retries,
            done,
        }
    }

    /// Nothing is written to the order. Used for free settlements, which re-run cleanly by finding no lines left.
    pub fn untracked(store: &'a S, order_id: &OrderId, actor: &str, retries: usize) -> Self {
        Self {
            store,
            order_id: order_id.clone(),
            event_id: None,
            claim: String::new(),
            lease: chrono::Duration::zero(),
            actor: actor.to_string(),
            retries,
            done: HashSet::new(),
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn is_done(&self, subject: &str) -> bool {
        self.done.contains(subject)
    }

    fn lease_end(&self) -> DateTime<Utc> {
        Utc::now().checked_add_signed(self.lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn in_progress(&self, event_id: &str) -> EngineError {
        EngineError::FollowUpInProgress { order: self.order_id.clone(), event: event_id.to_string() }
    }

    /// A new marker of `kind`, claimed by this delivery. `None` when no event is being followed.
    pub fn new_marker(&self, kind: &str) -> Option<PendingEffects> {
        let event_id = self.event_id.as_deref()?;
        let mut marker = PendingEffects::new(event_id, kind);
        marker.claimed_by = self.claim.clone();
        marker.lease_until = Some(self.lease_end());
        Some(marker)
    }

    /// The event's marker on `order` if this delivery holds it. Fails if another delivery does.
    pub fn own_marker<'o>(&self, order: &'o Order) -> Result<Option<&'o PendingEffects>, EngineError> {
        let Some(event_id) = &self.event_id else { return Ok(None) };
        match order.pending_effects(event_id) {
            Some(marker) if marker.claimed_by != self.claim => Err(self.in_progress(event_id)),
            other => Ok(other),
        }
    }

    /// Claims the marker an earlier delivery left behind, and picks up everything it has marked done since. Fails
    /// with [`EngineError::FollowUpInProgress`] while that delivery's lease is live, or if the marker has gone.
    pub async fn take_over(&mut self) -> Result<(), EngineError> {
        let Some(event_id) = self.event_id.clone() else { return Ok(()) };
        let path = marker_path(&event_id);
        let outcome = patch_with_retry(self.store, &order_ref(&self.order_id), &self.actor, self.retries, |doc| {
            let order = doc.parse::<Order>()?;
            let marker = order.pending_effects(&event_id).ok_or_else(|| self.in_progress(&event_id))?;
            if marker.is_leased_to_other(&self.claim, Utc::now()) {
                return Err(self.in_progress(&event_id));
            }
            Ok(vec![
                PatchOp::set(path.clone().key("claimed_by"), Value::String(self.claim.clone())),
                PatchOp::set(path.clone().key("lease_until"), json!(self.lease_end())),
            ])
        })
        .await?;
        let order = outcome.document.parse::<Order>()?;
        if let Some(marker) = order.pending_effects(&event_id) {
            info!("🧾️ {} took over the follow-up for event {event_id} on order {}", self.claim, self.order_id);
            self.done.extend(marker.done.iter().cloned());
        }
        Ok(())
    }

    /// Marks `subject` as done on the order's marker. Does nothing if the order carries no marker for the event.
    pub async fn mark_done(&mut self, subject: String) -> Result<(), EngineError> {
        if self.done.contains(&subject) {
            return Ok(());
        }
        if let Some(event_id) = &self.event_id {
            let path = marker_path(event_id).key("done").end();
            patch_with_retry(self.store, &order_ref(&self.order_id), &self.actor, self.retries, |doc| {
                let order = doc.parse::<Order>()?;
                match order.pending_effects(event_id) {
                    Some(marker) if !marker.done.contains(&subject) => {
                        Ok(vec![PatchOp::add(path.clone(), Value::String(subject.clone()))])
                    },
                    _ => Ok(vec![]),
                }
            })
            .await?;
            trace!("🧾️ {subject} done for event {event_id} on order {}", self.order_id);
        }
        self.done.insert(subject);
        Ok(())
    }

    /// Removes the event's marker from the order. A marker claimed by another delivery is left for that delivery,
    /// and the call fails with [`EngineError::FollowUpInProgress`].
    pub async fn finish(&self) -> Result<(), EngineError> {
        let Some(event_id) = &self.event_id else { return Ok(()) };
        let outcome = patch_with_retry(self.store, &order_ref(&self.order_id), &self.actor, self.retries, |doc| {
            let order = doc.parse::<Order>()?;
            match self.own_marker(&order)? {
                Some(_) => Ok(vec![PatchOp::remove(marker_path(event_id))]),
                None => Ok(vec![]),
            }
        })
        .await?;
        if outcome.applied {
            debug!("🧾️ Follow-up for event {event_id} on order {} is complete", self.order_id);
        }
        Ok(())
    }

    /// Gives up this delivery's lease so that a redelivery can take the marker over straight away.
    pub async fn release(&self) {
        let Some(event_id) = &self.event_id else { return };
        let path = marker_path(event_id).key("lease_until");
        let result = patch_with_retry(self.store, &order_ref(&self.order_id), &self.actor, self.retries, |doc| {
            let order = doc.parse::<Order>()?;
            match order.pending_effects(event_id) {
                Some(marker) if marker.claimed_by == self.claim => {
                    Ok(vec![PatchOp::set(path.clone(), json!(Utc::now()))])
                },
                _ => Ok(vec![]),
            }
        })
        .await;
        match result {
            Ok(outcome) if outcome.applied => {
                debug!("🧾️ Released the follow-up for event {event_id} on order {}", self.order_id)
            },
            Ok(_) => {},
            Err(e) => warn!(
                "🧾️ Could not release the follow-up for event {event_id} on order {}. A redelivery must wait for the \
                 lease to run out. {e}",
                self.order_id
            ),
        }
    }
}
