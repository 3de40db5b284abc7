//! `RefundApi` turns succeeded gateway refunds into credits on the order.
//!
//! Refunds are requested elsewhere: the requester prepends a FULL_REFUND or PARTIAL_REFUND entry carrying the
//! gateway `refund_id` to each affected line's price log. When the gateway reports the charge as refunded, every
//! succeeded refund is matched back to those entries, and one credit is written per refund.
//!
//! Each credit's patch also records the credit on the event's follow-up marker. A redelivered event that finds the
//! marker takes it over, recovers those credits from the order and finishes the inventory restores and
//! notifications.
use std::{collections::HashSet, fmt::Debug};

use chrono::Utc;
use log::*;
use mkt_common::Cents;
use serde_json::json;

use crate::{
    db_types::{
        AdjustmentReason,
        Case,
        Container,
        Credit,
        CreditId,
        Customer,
        DocRef,
        LineId,
        Notification,
        Order,
        OrderId,
        PaidStatus,
        PaidStatusEntry,
        PendingEffects,
        PriceKind,
        PriceLogEntry,
        PriceStatus,
    },
    engine_api::{
        config::EngineConfig,
        effects::{EffectKind, EffectLog},
        errors::EngineError,
        follow_up::{add_marker, marker_path, FollowUp},
        inventory_api::{AdjustmentOutcome, InventoryApi},
        receipts::{CreditedRefund, RefundReceipt},
        settlement_api::{inventory_location, planned_line},
        support::{fetch_order, fetch_parsed, is_processed, order_ref, patch_with_retry, record_processed, to_json},
    },
    events::{EventProducers, RefundProcessedEvent},
    gateway_types::{ChargeRefunded, RefundDetails, RefundStatus},
    helpers::{unique_code, CREDIT_CODE_PREFIX},
    patch::{DocPath, PatchOp},
    traits::{DocumentStore, Notifier, PaymentGateway, Predicate, PublishOptions, Scope, StoreError},
};

pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// A price-log entry waiting on a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundMatch {
    pub line_id: LineId,
    pub index: usize,
    pub entry: PriceLogEntry,
}

/// Every entry in the order's price logs that is waiting on `refund_id`.
pub fn find_matches(order: &Order, refund_id: &str) -> Vec<RefundMatch> {
    order
        .lines
        .iter()
        .flat_map(|line| {
            line.price_log
                .entries()
                .filter(|(_, e)| e.refund_id.as_deref() == Some(refund_id))
                .map(|(index, entry)| RefundMatch { line_id: line.id.clone(), index, entry: entry.clone() })
        })
        .collect()
}

/// Every entry in the order's price logs that was settled by `credit_id`.
pub fn credited_matches(order: &Order, credit_id: &CreditId) -> Vec<RefundMatch> {
    order
        .lines
        .iter()
        .flat_map(|line| {
            line.price_log
                .entries()
                .filter(|(_, e)| e.credit_id.as_ref() == Some(credit_id))
                .map(|(index, entry)| RefundMatch { line_id: line.id.clone(), index, entry: entry.clone() })
        })
        .collect()
}

/// The lines touched by `matches`, in order and without repeats.
fn matched_lines(matches: &[RefundMatch]) -> Vec<LineId> {
    let mut lines = Vec::<LineId>::new();
    for m in matches {
        if !lines.contains(&m.line_id) {
            lines.push(m.line_id.clone());
        }
    }
    lines
}

/// A refund is a full refund only if every entry it settles is one.
pub fn classify<'a, I>(entries: I) -> PaidStatus
where I: IntoIterator<Item = &'a PriceLogEntry> {
    let mut any = false;
    for entry in entries {
        any = true;
        if entry.kind != PriceKind::FullRefund {
            return PaidStatus::PartialRefund;
        }
    }
    if any {
        PaidStatus::FullRefund
    } else {
        PaidStatus::PartialRefund
    }
}

/// The credit for a refund. Entry taxes are stored with the sign of the entry, so their magnitudes are summed.
pub fn credit_for(refund: &RefundDetails, charge_id: &str, matches: &[RefundMatch], code: String) -> Credit {
    let tax = matches.iter().map(|m| m.entry.tax.abs()).sum::<Cents>();
    Credit {
        id: CreditId::for_refund(&refund.id),
        code,
        charge_id: charge_id.to_string(),
        refund_id: refund.id.clone(),
        amount: refund.amount - tax,
        tax,
        currency: refund.currency.clone(),
        destination: refund.destination.clone(),
        date: refund.created,
    }
}

pub struct RefundApi<S, G, N> {
    store: S,
    gateway: G,
    notifier: N,
    config: EngineConfig,
    producers: EventProducers,
    inventory: InventoryApi<S>,
}

impl<S, G, N> Debug for RefundApi<S, G, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundApi ({:?})", self.config)
    }
}

impl<S, G, N> RefundApi<S, G, N>
where
    S: DocumentStore,
    G: PaymentGateway,
    N: Notifier,
{
    pub fn new(store: S, gateway: G, notifier: N, config: EngineConfig, producers: EventProducers) -> Self {
        let inventory = InventoryApi::new(store.clone(), config.patch_retries);
        Self { store, gateway, notifier, config, producers, inventory }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Credits every succeeded refund on the charge that is still pending on the order.
    ///
    /// The order and the customer are loaded before anything is written; if either is missing the event fails with
    /// [`EngineError::OrderNotFound`] or [`EngineError::CustomerNotFound`]. A refund that was credited before is
    /// reported in `unmatched` and left alone.
    pub async fn process_refund(&self, event: &ChargeRefunded) -> Result<RefundReceipt, EngineError> {
        let order_id = &event.metadata.order_id;
        if is_processed(&self.store, &event.event_id).await? {
            info!("💸️ Refund event {} for order {order_id} has already been processed", event.event_id);
            return Ok(RefundReceipt::duplicate(order_id, &event.event_id));
        }
        let (_, order) = fetch_order(&self.store, order_id).await?;
        let customer = self.fetch_customer(&event.metadata.customer_email).await?;
        let refunds = self.gateway.list_refunds(&event.charge_id, event.account.as_deref()).await?;
        let actor = format!("refund:{}", event.charge_id);
        let retries = self.config.patch_retries;
        let lease = self.config.follow_up_lease;
        let mut follow_up = FollowUp::for_event(&self.store, &order, &event.event_id, &actor, retries, lease);
        let mut effects = EffectLog::default();
        let mut credited = match order.pending_effects(&event.event_id) {
            Some(marker) => {
                info!(
                    "💸️ Refund event {} was committed to order {order_id} but did not finish. Resuming its follow-up.",
                    event.event_id
                );
                follow_up.take_over().await?;
                recover_credits(&order, marker)
            },
            None => vec![],
        };
        let mut unmatched = vec![];

        let outcome = async {
            for refund in refunds.iter().filter(|r| r.status == RefundStatus::Succeeded) {
                if credited.iter().any(|(c, _)| c.refund_id == refund.id) {
                    continue;
                }
                if find_matches(&order, &refund.id).is_empty() {
                    debug!("💸️ Refund {} matches nothing pending on order {order_id}", refund.id);
                    unmatched.push(refund.id.clone());
                    continue;
                }
                match self.credit_refund(&order, &event.charge_id, refund, &actor, &follow_up).await? {
                    Some(result) => credited.push(result),
                    None => unmatched.push(refund.id.clone()),
                }
            }
            let pending = refunds.iter().filter(|r| r.status != RefundStatus::Succeeded).count();
            if pending > 0 {
                debug!("💸️ {pending} refunds on charge {} have not succeeded yet", event.charge_id);
            }

            for (c, matches) in &credited {
                self.restore_inventory(&order, &c.credit.id, matches, &actor, &mut effects, &mut follow_up).await?;
            }
            let credited = credited.iter().map(|(c, _)| c.clone()).collect::<Vec<_>>();
            if !credited.is_empty() {
                self.notify_refunds(order_id, &customer, &credited, &actor, &mut effects, &mut follow_up).await?;
                if let Some(case) = order.references_case() {
                    self.email_case_contact(&order, case, &credited, &mut effects, &mut follow_up).await?;
                }
            }
            follow_up.finish().await?;
            Ok::<_, EngineError>(credited)
        }
        .await;
        let credited = match outcome {
            Ok(credited) => credited,
            Err(e) => {
                follow_up.release().await;
                return Err(e);
            },
        };
        record_processed(&self.store, &event.event_id, CHARGE_REFUNDED, order_id, &actor).await?;
        let hook = RefundProcessedEvent {
            order_id: order_id.clone(),
            charge_id: event.charge_id.clone(),
            credits: credited.iter().map(|c| c.credit.clone()).collect(),
            classifications: credited.iter().map(|c| c.classification).collect(),
        };
        self.producers.refund_processed(hook).await;
        Ok(RefundReceipt {
            order_id: order_id.clone(),
            event_id: event.event_id.clone(),
            duplicate: false,
            credited,
            unmatched,
            effects: effects.into_records(),
        })
    }

    async fn fetch_customer(&self, email: &str) -> Result<Customer, EngineError> {
        let predicate = Predicate::eq("/email", email);
        let found = self.store.query(Container::Customers, &predicate, &Scope::CrossPartition).await?;
        let doc = found.into_iter().next().ok_or_else(|| EngineError::CustomerNotFound(email.to_string()))?;
        Ok(doc.parse::<Customer>()?)
    }

    /// Writes one refund's credit, and records it on the event's follow-up marker, in a single patch. Returns `None`
    /// if a concurrent delivery credited it first.
    async fn credit_refund(
        &self,
        order: &Order,
        charge_id: &str,
        refund: &RefundDetails,
        actor: &str,
        follow_up: &FollowUp<'_, S>,
    ) -> Result<Option<(CreditedRefund, Vec<RefundMatch>)>, EngineError> {
        let credit_id = CreditId::for_refund(&refund.id);
        let mut computed = None;
        let retries = self.config.patch_retries;
        patch_with_retry(&self.store, &order_ref(&order.id), actor, retries, |doc| {
            computed = None;
            let current = doc.parse::<Order>()?;
            let matches = find_matches(&current, &refund.id);
            if matches.is_empty() {
                return Ok(vec![]);
            }
            let classification = classify(matches.iter().map(|m| &m.entry));
            let lines = matched_lines(&matches);
            let mut ops = vec![];
            for m in &matches {
                let entry = DocPath::root().key("lines").id(&m.line_id).key("price_log").index(m.index);
                ops.push(PatchOp::set(entry.clone().key("status"), to_json(&PriceStatus::Success)?));
                ops.push(PatchOp::remove(entry.clone().key("refund_id")));
                ops.push(PatchOp::set(entry.key("credit_id"), to_json(&credit_id)?));
            }
            for line in &lines {
                let status = to_json(&PaidStatusEntry::new(classification, actor))?;
                ops.push(PatchOp::prepend(DocPath::root().key("lines").id(line).key("paid_status_log"), status));
            }
            let credit = match current.credits.iter().find(|c| c.id == credit_id) {
                Some(existing) => existing.clone(),
                None => {
                    let taken = current.credits.iter().map(|c| c.code.as_str()).collect::<HashSet<_>>();
                    let attempts = self.config.payment_code_attempts;
                    let code = unique_code(CREDIT_CODE_PREFIX, &taken, attempts, credit_id.as_str());
                    let credit = credit_for(refund, charge_id, &matches, code);
                    ops.push(PatchOp::prepend(DocPath::root().key("credits"), to_json(&credit)?));
                    credit
                },
            };
            match follow_up.own_marker(&current)? {
                Some(marker) => {
                    let path = marker_path(&marker.id);
                    if !marker.credits.contains(&credit_id) {
                        ops.push(PatchOp::add(path.clone().key("credits").end(), to_json(&credit_id)?));
                    }
                    for line in lines.iter().filter(|l| !marker.lines.contains(l)) {
                        ops.push(PatchOp::add(path.clone().key("lines").end(), to_json(line)?));
                    }
                },
                None => {
                    if let Some(mut marker) = follow_up.new_marker(CHARGE_REFUNDED) {
                        marker.credits = vec![credit_id.clone()];
                        marker.lines = lines.clone();
                        ops.push(add_marker(&marker)?);
                    }
                },
            }
            let result = CreditedRefund { refund_id: refund.id.clone(), classification, credit, lines };
            computed = Some((result, matches));
            Ok(ops)
        })
        .await?;
        match &computed {
            Some((c, _)) => info!(
                "💸️ Refund {} credited to order {} as {} ({:?}, {} net of {} tax)",
                c.refund_id, order.id, c.credit.code, c.classification, c.credit.amount, c.credit.tax
            ),
            None => debug!("💸️ Refund {} was credited concurrently", refund.id),
        }
        Ok(computed)
    }

    /// Puts back the stock of every matched entry. Each entry is restored at most once per event.
    async fn restore_inventory(
        &self,
        order: &Order,
        credit_id: &CreditId,
        matches: &[RefundMatch],
        actor: &str,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        for (n, m) in matches.iter().enumerate() {
            let Some(line) = order.line(&m.line_id) else { continue };
            let planned = planned_line(order, line);
            let qty = m.entry.price.units();
            let done_key = format!("inventory:{credit_id}:{}:{n}", m.line_id);
            match inventory_location(&planned, &order.id, &self.inventory).await {
                Ok(Some(location)) if follow_up.is_done(&done_key) => {
                    effects.skipped(EffectKind::Inventory, location.variant(), "already restored for this event")
                },
                Ok(Some(location)) => {
                    let result =
                        self.inventory.restore(&location, qty, AdjustmentReason::Refund, &order.id, actor).await;
                    match result {
                        Ok(AdjustmentOutcome::Applied(_)) => {
                            effects.applied(EffectKind::Inventory, location.variant());
                            follow_up.mark_done(done_key).await?;
                        },
                        Ok(AdjustmentOutcome::Untracked) => {
                            effects.skipped(EffectKind::Inventory, location.variant(), "stock is not tracked")
                        },
                        Err(e) => effects.failed(EffectKind::Inventory, location.variant(), e),
                    }
                },
                Ok(None) => {},
                Err(e) => effects.failed(EffectKind::Inventory, &m.line_id, e),
            }
        }
        Ok(())
    }

    /// Publishes `topic` to `options`' audience unless the follow-up already did. `subject` names the delivery.
    async fn publish_once(
        &self,
        subject: String,
        topic: &str,
        payload: serde_json::Value,
        options: PublishOptions,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        if follow_up.is_done(&subject) {
            effects.skipped(EffectKind::Notification, subject, "already published for this event");
            return Ok(());
        }
        let result = self.notifier.publish(topic, payload, options).await;
        let published = result.is_ok();
        effects.record(EffectKind::Notification, &subject, result);
        if published {
            follow_up.mark_done(subject).await?;
        }
        Ok(())
    }

    async fn notify_refunds(
        &self,
        order_id: &OrderId,
        customer: &Customer,
        credited: &[CreditedRefund],
        actor: &str,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        match fetch_order(&self.store, order_id).await {
            Ok((_, order)) => match to_json(&order) {
                Ok(payload) => {
                    let options = PublishOptions::upsert_to_group(&customer.email);
                    self.publish_once("order".into(), "order", payload, options, effects, follow_up).await?;
                },
                Err(e) => effects.failed(EffectKind::Notification, "order", e),
            },
            Err(e) => effects.failed(EffectKind::Notification, "order", e),
        }
        for c in credited {
            let payload = json!({
                "order_id": order_id,
                "refund_id": c.refund_id,
                "credit_code": c.credit.code,
                "amount": c.credit.amount,
                "tax": c.credit.tax,
                "currency": c.credit.currency,
                "classification": c.classification,
            });
            let channels = [
                (customer.email.as_str(), PublishOptions::upsert_to_group(&customer.email)),
                (customer.user_id.as_str(), PublishOptions::upsert_to_user(&customer.user_id)),
            ];
            for (recipient, options) in channels {
                let notification = Notification {
                    id: format!("refund-succeeded:{}", c.refund_id),
                    topic: "refund-succeeded".to_string(),
                    recipient: recipient.to_string(),
                    payload: payload.clone(),
                    created_at: Utc::now(),
                };
                self.persist_notification(&notification, actor, effects).await;
                let subject = format!("refund-succeeded:{}→{recipient}", c.refund_id);
                self.publish_once(subject, "refund-succeeded", payload.clone(), options, effects, follow_up).await?;
            }
        }
        Ok(())
    }

    async fn persist_notification(&self, notification: &Notification, actor: &str, effects: &mut EffectLog) {
        let body = match to_json(notification) {
            Ok(b) => b,
            Err(e) => return effects.failed(EffectKind::Notification, &notification.id, e),
        };
        let partition = notification.recipient.as_str();
        match self.store.insert(Container::Notifications, body, partition, actor).await {
            Ok(_) => effects.applied(EffectKind::Notification, &notification.id),
            Err(StoreError::AlreadyExists { .. }) => {
                effects.skipped(EffectKind::Notification, &notification.id, "already stored")
            },
            Err(e) => effects.failed(EffectKind::Notification, &notification.id, e),
        }
    }

    async fn email_case_contact(
        &self,
        order: &Order,
        case_ref: &DocRef,
        credited: &[CreditedRefund],
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        let case = match fetch_parsed::<_, Case>(&self.store, case_ref).await {
            Ok((_, case)) => case,
            Err(e) => {
                effects.failed(EffectKind::Email, format!("refund-processed→{}", case_ref.id), e);
                return Ok(());
            },
        };
        let subject = format!("refund-processed→{}", case.contact_email);
        if follow_up.is_done(&subject) {
            effects.skipped(EffectKind::Email, subject, "already sent for this event");
            return Ok(());
        }
        let variables = json!({
            "order_id": order.id,
            "code": order.code,
            "case_id": case.id,
            "credits": credited.iter().map(|c| &c.credit).collect::<Vec<_>>(),
        });
        let result = self.notifier.send_templated_email("refund-processed", &case.contact_email, variables).await;
        let sent = result.is_ok();
        effects.record(EffectKind::Email, &subject, result);
        if sent {
            follow_up.mark_done(subject).await?;
        }
        Ok(())
    }
}

/// Rebuilds the credits a resumed event already wrote, with the entries each one settled.
fn recover_credits(order: &Order, marker: &PendingEffects) -> Vec<(CreditedRefund, Vec<RefundMatch>)> {
    marker
        .credits
        .iter()
        .filter_map(|id| {
            let Some(credit) = order.credits.iter().find(|c| &c.id == id) else {
                warn!("💸️ Credit {id} is on the follow-up for event {} but not on order {}", marker.id, order.id);
                return None;
            };
            let matches = credited_matches(order, id);
            let result = CreditedRefund {
                refund_id: credit.refund_id.clone(),
                classification: classify(matches.iter().map(|m| &m.entry)),
                credit: credit.clone(),
                lines: matched_lines(&matches),
            };
            Some((result, matches))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::{
        db_types::{Currency, LineRef, LineTarget, Listing, Money, OrderLine, VariantId},
        test_utils::{
            fakes::{FakeGateway, FlakyStore, RecordingNotifier},
            fixtures::*,
            prepare_env::prepare_test_store,
        },
        SqliteDocumentStore,
    };

    fn entry(kind: PriceKind, amount: i64, qty: i64) -> PriceLogEntry {
        PriceLogEntry::refund(kind, Money::new(Cents::from(amount), qty, Currency::default()), "re_x")
    }

    #[test]
    fn classification() {
        let full = entry(PriceKind::FullRefund, -5000, -2);
        let partial = entry(PriceKind::PartialRefund, -1000, 0);
        assert_eq!(classify([&full]), PaidStatus::FullRefund);
        assert_eq!(classify([&full, &full]), PaidStatus::FullRefund);
        assert_eq!(classify([&full, &partial]), PaidStatus::PartialRefund);
        assert_eq!(classify([&partial]), PaidStatus::PartialRefund);
        assert_eq!(classify(std::iter::empty()), PaidStatus::PartialRefund);
    }

    #[test]
    fn credits_are_net_of_tax() {
        let refund = RefundDetails {
            id: "re_9".into(),
            amount: Cents::from(5400),
            currency: Currency::default(),
            status: RefundStatus::Succeeded,
            destination: Some("card_1".into()),
            created: Utc::now(),
        };
        let taxed = |line: &str, amount, tax| RefundMatch {
            line_id: line.into(),
            index: 0,
            entry: entry(PriceKind::FullRefund, amount, -1).with_tax(Cents::from(tax)),
        };
        let matches = vec![taxed("L1", -3000, -240), taxed("L2", -2000, -160)];
        let credit = credit_for(&refund, "ch_9", &matches, "C-TEST22".into());
        assert_eq!(credit.id, CreditId::from("cr_re_9"));
        assert_eq!(credit.tax, Cents::from(400));
        assert_eq!(credit.amount, Cents::from(5000));
        assert_eq!(credit.destination.as_deref(), Some("card_1"));
    }

    type Api = RefundApi<SqliteDocumentStore, FakeGateway, RecordingNotifier>;

    async fn setup() -> (Api, FakeGateway, RecordingNotifier) {
        let store = prepare_test_store().await;
        let gateway = FakeGateway::default();
        let notifier = RecordingNotifier::default();
        let config = EngineConfig::default();
        let api = RefundApi::new(store, gateway.clone(), notifier.clone(), config, EventProducers::default());
        (api, gateway, notifier)
    }

    /// A paid two-unit product line with a pending full refund on top.
    fn refunded_line(refund_id: &str) -> OrderLine {
        let target = LineTarget::ProductPurchase { variant_id: Some(VariantId::from("V1")) };
        let mut l = paid_line("L1", "M1", target, 5000, 2);
        let price = Money::new(Cents::from(-5000), -2, Currency::default());
        l.price_log.record(PriceLogEntry::refund(PriceKind::FullRefund, price, refund_id).with_tax(Cents::from(-400)));
        l
    }

    #[tokio::test]
    async fn refund_is_credited_once() {
        let (api, gateway, notifier) = setup().await;
        let store = api.store();
        seed(store, Container::Customers, &customer("cust-1", "buyer@example.com", "user-1"), "cust-1").await;
        seed_inventory(store, "V1", 8, 0).await;
        seed(store, Container::Orders, &order("O1", "buyer@example.com", vec![refunded_line("re_1")]), "O1").await;
        gateway.add_refund("ch_1", refund_details("re_1", 5000, RefundStatus::Succeeded));
        gateway.add_refund("ch_1", refund_details("re_2", 100, RefundStatus::Pending));

        let receipt = api.process_refund(&refunded("evt_r1", "ch_1", "O1", "buyer@example.com")).await.unwrap();
        assert_eq!(receipt.credited.len(), 1);
        assert!(receipt.unmatched.is_empty());
        let c = &receipt.credited[0];
        assert_eq!(c.classification, PaidStatus::FullRefund);
        assert_eq!(c.credit.amount, Cents::from(4600));
        assert!(c.credit.code.starts_with("C-"));

        let (_, stored) = fetch_order(store, &OrderId::from("O1")).await.unwrap();
        let line = stored.line(&LineId::from("L1")).unwrap();
        let head = line.price_log.current().unwrap();
        assert_eq!(head.status, PriceStatus::Success);
        assert_eq!(head.refund_id, None);
        assert_eq!(head.credit_id, Some(CreditId::from("cr_re_1")));
        assert_eq!(line.current_paid_status(), Some(PaidStatus::FullRefund));
        assert_eq!(stored.credits.len(), 1);
        assert_eq!(inventory_levels(store, "V1").await.qty_on_hand, 10);

        let published = notifier.published();
        let refunds = published.iter().filter(|p| p.topic == "refund-succeeded").collect::<Vec<_>>();
        assert_eq!(refunds.len(), 2);
        assert!(published.iter().any(|p| p.topic == "order"));
        for recipient in ["user-1", "buyer@example.com"] {
            let saved = store.get_by_id(Container::Notifications, "refund-succeeded:re_1", recipient).await.unwrap();
            let saved = saved.unwrap().parse::<Notification>().unwrap();
            assert_eq!(saved.recipient, recipient);
            assert_eq!(saved.topic, "refund-succeeded");
        }

        // A new event for the same charge finds nothing left to credit
        let again = api.process_refund(&refunded("evt_r2", "ch_1", "O1", "buyer@example.com")).await.unwrap();
        assert!(again.credited.is_empty());
        assert_eq!(again.unmatched, vec!["re_1".to_string()]);
        let (_, after) = fetch_order(store, &OrderId::from("O1")).await.unwrap();
        assert_eq!(after, stored);
        assert_eq!(inventory_levels(store, "V1").await.qty_on_hand, 10);
    }

    #[tokio::test]
    async fn unknown_customer_fails_before_any_write() {
        let (api, gateway, _) = setup().await;
        let store = api.store();
        let o = order("O2", "stranger@example.com", vec![refunded_line("re_3")]);
        seed(store, Container::Orders, &o, "O2").await;
        gateway.add_refund("ch_2", refund_details("re_3", 5000, RefundStatus::Succeeded));
        let err = api.process_refund(&refunded("evt_r3", "ch_2", "O2", "stranger@example.com")).await.unwrap_err();
        assert!(matches!(err, EngineError::CustomerNotFound(_)), "{err}");
        let (_, stored) = fetch_order(store, &OrderId::from("O2")).await.unwrap();
        assert_eq!(stored, o);
    }

    #[tokio::test]
    async fn partial_refund_is_credited_and_the_case_contact_told() {
        let (api, gateway, notifier) = setup().await;
        let store = api.store();
        seed(store, Container::Customers, &customer("cust-1", "buyer@example.com", "user-1"), "cust-1").await;
        let case = json!({ "id": "C3", "status": "ACTIVE", "contact_email": "lawyer@example.com" });
        store.insert(Container::Cases, case, "C3", "test").await.unwrap();
        let mut l1 = paid_line("L1", "M1", LineTarget::CaseInvoiceLine, 8000, 1);
        let price = Money::new(Cents::from(-1500), 0, Currency::default());
        l1.price_log.record(PriceLogEntry::refund(PriceKind::PartialRefund, price, "re_p").with_tax(Cents::from(-100)));
        let mut o = order("O3", "buyer@example.com", vec![l1]);
        o.reference = Some(DocRef::own_partition(Container::Cases, "C3"));
        seed(store, Container::Orders, &o, "O3").await;
        gateway.add_refund("ch_3", refund_details("re_p", 1500, RefundStatus::Succeeded));

        let receipt = api.process_refund(&refunded("evt_r4", "ch_3", "O3", "buyer@example.com")).await.unwrap();
        assert_eq!(receipt.credited.len(), 1);
        let c = &receipt.credited[0];
        assert_eq!(c.classification, PaidStatus::PartialRefund);
        assert_eq!((c.credit.amount, c.credit.tax), (Cents::from(1400), Cents::from(100)));
        assert_eq!(c.lines, vec![LineId::from("L1")]);

        let (_, stored) = fetch_order(store, &OrderId::from("O3")).await.unwrap();
        assert_eq!(stored.line(&LineId::from("L1")).unwrap().current_paid_status(), Some(PaidStatus::PartialRefund));
        assert!(stored.effects_pending.is_empty());
        let emails = notifier.emails();
        assert!(emails.iter().any(|e| e.template == "refund-processed" && e.recipient == "lawyer@example.com"));
    }

    #[tokio::test]
    async fn refunded_tour_ticket_goes_back_on_sale() {
        let (api, gateway, _) = setup().await;
        let store = api.store();
        seed(store, Container::Customers, &customer("cust-1", "buyer@example.com", "user-1"), "cust-1").await;
        let listing = json!({
            "id": "tour-1", "merchant_id": "M1",
            "ticket_types": [{
                "id": "adult",
                "price": { "amount": 3000, "currency": "usd" },
                "inventory": { "qty_on_hand": 19, "qty_committed": 0, "track": true }
            }]
        });
        store.insert(Container::Listings, listing, "M1", "test").await.unwrap();
        let booking = json!({
            "id": "B1",
            "listing": { "id": "tour-1", "partition": "M1", "container": "listings" },
            "sessions": [{ "id": "s1", "tickets": [{ "id": "t1", "variant_id": "adult" }] }]
        });
        store.insert(Container::Bookings, booking, "M1", "test").await.unwrap();
        let target = LineTarget::TourBooking { session_id: "s1".into(), ticket_id: "t1".into() };
        let mut l1 = paid_line("L1", "M1", target, 3000, 1);
        l1.reference = LineRef::Concrete(DocRef::new(Container::Bookings, "B1", "M1"));
        let price = Money::new(Cents::from(-3000), -1, Currency::default());
        l1.price_log.record(PriceLogEntry::refund(PriceKind::FullRefund, price, "re_t"));
        seed(store, Container::Orders, &order("O4", "buyer@example.com", vec![l1]), "O4").await;
        gateway.add_refund("ch_4", refund_details("re_t", 3000, RefundStatus::Succeeded));

        let receipt = api.process_refund(&refunded("evt_r5", "ch_4", "O4", "buyer@example.com")).await.unwrap();
        assert_eq!(receipt.credited[0].classification, PaidStatus::FullRefund);
        let doc = store.get_by_id(Container::Listings, "tour-1", "M1").await.unwrap().unwrap();
        let listing = doc.parse::<Listing>().unwrap();
        assert_eq!(listing.ticket_type(&VariantId::from("adult")).unwrap().inventory.qty_on_hand, 20);
    }

    #[tokio::test]
    async fn refund_interrupted_after_credit_finishes_on_redelivery() {
        let store = FlakyStore::new(prepare_test_store().await);
        let gateway = FakeGateway::default();
        let notifier = RecordingNotifier::default();
        let (config, producers) = (EngineConfig::default(), EventProducers::default());
        let api = RefundApi::new(store.clone(), gateway.clone(), notifier.clone(), config, producers);
        seed(&store, Container::Customers, &customer("cust-1", "buyer@example.com", "user-1"), "cust-1").await;
        seed_inventory(&store, "V1", 8, 0).await;
        seed(&store, Container::Orders, &order("O5", "buyer@example.com", vec![refunded_line("re_5")]), "O5").await;
        gateway.add_refund("ch_5", refund_details("re_5", 5000, RefundStatus::Succeeded));
        let event = refunded("evt_r6", "ch_5", "O5", "buyer@example.com");

        // Reads: the order, the credit, the inventory mark, the order payload, three publish marks, then the
        // read that removes the marker
        store.fail_read(Container::Orders, 8);
        assert!(api.process_refund(&event).await.is_err());
        let (_, interrupted) = fetch_order(&store, &OrderId::from("O5")).await.unwrap();
        let marker = interrupted.pending_effects("evt_r6").unwrap();
        assert_eq!(marker.credits, vec![CreditId::from("cr_re_5")]);
        assert_eq!(marker.lines, vec![LineId::from("L1")]);
        assert!(marker.done.contains(&"inventory:cr_re_5:L1:0".to_string()));
        let published = notifier.published().len();
        assert_eq!(published, 3);

        let receipt = api.process_refund(&event).await.unwrap();
        assert!(!receipt.duplicate);
        assert_eq!(receipt.credited.len(), 1);
        assert_eq!(receipt.credited[0].credit.amount, Cents::from(4600));
        assert_eq!(receipt.credited[0].lines, vec![LineId::from("L1")]);
        assert_eq!(inventory_levels(&store, "V1").await.qty_on_hand, 10);
        assert_eq!(notifier.published().len(), published);
        let (_, stored) = fetch_order(&store, &OrderId::from("O5")).await.unwrap();
        assert!(stored.effects_pending.is_empty());
        assert_eq!(stored.credits.len(), 1);

        assert!(api.process_refund(&event).await.unwrap().duplicate);
    }
}
