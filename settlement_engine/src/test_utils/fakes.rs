//! In-memory stand-ins for the payment gateway and the notifier, and a store wrapper that fails on cue.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::*;
use serde_json::Value;

use crate::{
    db_types::Container,
    gateway_types::{ChargeDetails, NewTransfer, RefundDetails, TransferReceipt},
    patch::PatchOp,
    traits::{
        Document,
        DocumentStore,
        GatewayError,
        NotifyError,
        Notifier,
        PaymentGateway,
        Predicate,
        PublishOptions,
        Scope,
        StoreError,
    },
};

#[derive(Debug, Default)]
struct GatewayState {
    charges: HashMap<String, ChargeDetails>,
    refunds: HashMap<String, Vec<RefundDetails>>,
    transfers: Vec<NewTransfer>,
    fail_transfers: bool,
    offline: bool,
}

/// A gateway that serves scripted charges and refunds, and records the transfers it is asked to make.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl FakeGateway {
    pub fn add_charge(&self, charge: ChargeDetails) {
        self.state.lock().unwrap().charges.insert(charge.id.clone(), charge);
    }

    pub fn add_refund(&self, charge_id: &str, refund: RefundDetails) {
        self.state.lock().unwrap().refunds.entry(charge_id.to_string()).or_default().push(refund);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.state.lock().unwrap().fail_transfers = fail;
    }

    /// While offline, every call fails with [`GatewayError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn transfers(&self) -> Vec<NewTransfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    fn check_online(state: &GatewayState) -> Result<(), GatewayError> {
        if state.offline {
            Err(GatewayError::Unavailable("the fake gateway is offline".into()))
        } else {
            Ok(())
        }
    }
}

impl PaymentGateway for FakeGateway {
    async fn retrieve_charge(&self, charge_id: &str, _account: Option<&str>) -> Result<ChargeDetails, GatewayError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state.charges.get(charge_id).cloned().ok_or_else(|| GatewayError::NotFound(charge_id.to_string()))
    }

    async fn list_refunds(&self, charge_id: &str, _account: Option<&str>) -> Result<Vec<RefundDetails>, GatewayError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(state.refunds.get(charge_id).cloned().unwrap_or_default())
    }

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<TransferReceipt, GatewayError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.fail_transfers {
            return Err(GatewayError::Rejected(format!("transfer to {} declined", transfer.destination)));
        }
        let receipt = TransferReceipt {
            id: format!("tr_{}", state.transfers.len() + 1),
            amount: transfer.amount,
            destination: transfer.destination.clone(),
        };
        state.transfers.push(transfer);
        Ok(receipt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Value,
    pub options: PublishOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub template: String,
    pub recipient: String,
    pub variables: Value,
}

#[derive(Debug, Default)]
struct NotifierState {
    published: Vec<Published>,
    emails: Vec<SentEmail>,
    failing: bool,
}

/// Records everything it is asked to deliver.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.state.lock().unwrap().published.iter().map(|p| p.topic.clone()).collect()
    }

    pub fn emails(&self) -> Vec<SentEmail> {
        self.state.lock().unwrap().emails.clone()
    }

    /// While failing, deliveries are rejected and not recorded.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }
}

impl Notifier for RecordingNotifier {
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(NotifyError::DeliveryFailed(format!("{topic} not delivered")));
        }
        trace!("📬️ Published {topic} to {:?}", options.audience);
        state.published.push(Published { topic: topic.to_string(), payload, options });
        Ok(())
    }

    async fn send_templated_email(&self, template: &str, recipient: &str, variables: Value) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(NotifyError::DeliveryFailed(format!("{template} to {recipient} not delivered")));
        }
        state.emails.push(SentEmail { template: template.to_string(), recipient: recipient.to_string(), variables });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FlakyState {
    reads: HashMap<Container, usize>,
    fail_at: HashMap<Container, usize>,
}

/// Wraps a store and fails one chosen read, to interrupt an event part-way through.
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    state: Arc<Mutex<FlakyState>>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, state: Arc::default() }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Counting from now, the `n`th read from `container` fails once with a transient database error.
    pub fn fail_read(&self, container: Container, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.reads.insert(container, 0);
        state.fail_at.insert(container, n);
    }

    fn check_read(&self, container: Container) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let reads = state.reads.entry(container).or_default();
        *reads += 1;
        let count = *reads;
        if state.fail_at.get(&container) == Some(&count) {
            state.fail_at.remove(&container);
            debug!("🗃️ Failing read {count} from {container}");
            return Err(StoreError::DatabaseError("transient".into()));
        }
        Ok(())
    }
}

impl<S: DocumentStore> DocumentStore for FlakyStore<S> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    async fn get_by_id(&self, container: Container, id: &str, partition: &str) -> Result<Option<Document>, StoreError> {
        self.check_read(container)?;
        self.inner.get_by_id(container, id, partition).await
    }

    async fn query(
        &self,
        container: Container,
        predicate: &Predicate,
        scope: &Scope,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.query(container, predicate, scope).await
    }

    async fn apply_ordered_patch(
        &self,
        container: Container,
        id: &str,
        partition: &str,
        ops: &[PatchOp],
        actor: &str,
        expected_version: Option<i64>,
    ) -> Result<Document, StoreError> {
        self.inner.apply_ordered_patch(container, id, partition, ops, actor, expected_version).await
    }

    async fn insert(
        &self,
        container: Container,
        body: Value,
        partition: &str,
        actor: &str,
    ) -> Result<Document, StoreError> {
        self.inner.insert(container, body, partition, actor).await
    }
}
