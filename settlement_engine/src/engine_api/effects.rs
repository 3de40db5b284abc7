use std::fmt::Display;

use log::*;
use serde::{Deserialize, Serialize};

/// Which side effect an [`EffectRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    TourTicket,
    CaseStatus,
    CaseOffer,
    VoidInvoice,
    ListingFee,
    Inventory,
    ServiceBooking,
    FeaturingTransfer,
    RateSummary,
    Notification,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EffectStatus {
    Applied,
    Skipped(String),
    Failed(String),
}

/// The outcome of one side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub kind: EffectKind,
    /// What the effect acted on, e.g. a line id, variant id or recipient
    pub subject: String,
    pub status: EffectStatus,
}

impl Display for EffectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            EffectStatus::Applied => write!(f, "{:?} on {}: applied", self.kind, self.subject),
            EffectStatus::Skipped(r) => write!(f, "{:?} on {}: skipped ({r})", self.kind, self.subject),
            EffectStatus::Failed(r) => write!(f, "{:?} on {}: FAILED ({r})", self.kind, self.subject),
        }
    }
}

/// Collects effect outcomes for one event. Failures are logged as they are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectLog(Vec<EffectRecord>);

impl EffectLog {
    pub fn applied<S: Display>(&mut self, kind: EffectKind, subject: S) {
        self.push(kind, subject, EffectStatus::Applied);
    }

    pub fn skipped<S: Display, R: Display>(&mut self, kind: EffectKind, subject: S, reason: R) {
        self.push(kind, subject, EffectStatus::Skipped(reason.to_string()));
    }

    pub fn failed<S: Display, R: Display>(&mut self, kind: EffectKind, subject: S, reason: R) {
        self.push(kind, subject, EffectStatus::Failed(reason.to_string()));
    }

    /// Records `Applied` for `Ok` and `Failed` for `Err`.
    pub fn record<S: Display, E: Display>(&mut self, kind: EffectKind, subject: S, result: Result<(), E>) {
        match result {
            Ok(()) => self.applied(kind, subject),
            Err(e) => self.failed(kind, subject, e),
        }
    }

    fn push<S: Display>(&mut self, kind: EffectKind, subject: S, status: EffectStatus) {
        let record = EffectRecord { kind, subject: subject.to_string(), status };
        match record.status {
            EffectStatus::Failed(_) => error!("🧾️ {record}"),
            _ => debug!("🧾️ {record}"),
        }
        self.0.push(record);
    }

    pub fn records(&self) -> &[EffectRecord] {
        &self.0
    }

    pub fn failures(&self) -> impl Iterator<Item = &EffectRecord> {
        self.0.iter().filter(|r| matches!(r.status, EffectStatus::Failed(_)))
    }

    pub fn of_kind(&self, kind: EffectKind) -> impl Iterator<Item = &EffectRecord> {
        self.0.iter().filter(move |r| r.kind == kind)
    }

    pub fn into_records(self) -> Vec<EffectRecord> {
        self.0
    }
}
