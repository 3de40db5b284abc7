//! `SettlementApi` applies captured charges to orders.
//!
//! A capture settles every line of the capturing merchant that is awaiting charge. Settlement runs in this order:
//!
//! 1. Select the lines and resolve inherited references.
//! 2. Restore authoritative prices on provisionally priced lines.
//! 3. Update the documents the lines pay for (tickets, cases, offers, listings).
//! 4. Record the payment and flip the lines to PAID, in one version-checked patch.
//! 5. Run the per-line side effects: inventory, service bookings, featuring transfers.
//! 6. Check whether the whole order is now settled, then notify.
//!
//! A failure in steps 1 to 4 aborts the event and the gateway redelivers it. Every step can be re-applied, and the
//! processed-event ledger short-circuits events that completed. Step 5 and the notifications are best-effort, and
//! their outcomes are returned as [`EffectRecord`](crate::engine_api::effects::EffectRecord)s on the receipt.
//!
//! The commit in step 4 also leaves a follow-up marker on the order. If the event fails after the commit, its
//! redelivery finds the marker and re-runs steps 5 and 6, skipping the effects that were marked done. A copy of the
//! event that arrives while another delivery holds the marker fails, and is delivered again later.
use std::{
    collections::{BTreeSet, HashSet},
    fmt::Debug,
};

use chrono::{DateTime, Utc};
use log::*;
use mkt_common::Cents;
use serde_json::json;

use crate::{
    db_types::{
        AdjustmentReason,
        Booking,
        Case,
        CaseOffer,
        CaseStatus,
        Container,
        DocRef,
        FeeBreakdown,
        Featuring,
        LineId,
        LineRef,
        LineTarget,
        Listing,
        MerchantId,
        Money,
        OfferStatus,
        Order,
        OrderId,
        OrderLine,
        PaidStatus,
        PaidStatusEntry,
        Payment,
        PaymentId,
        PaymentMethod,
        PriceStatus,
        Service,
        ServiceBooking,
        TargetFamily,
        TicketStatusEntry,
        UnitPrice,
        Vendor,
    },
    engine_api::{
        config::EngineConfig,
        effects::{EffectKind, EffectLog},
        errors::EngineError,
        follow_up::{add_marker, FollowUp},
        inventory_api::{AdjustmentOutcome, InventoryApi, InventoryLocation},
        receipts::SettlementReceipt,
        support::{
            fetch_order,
            fetch_parsed,
            fetch_required,
            is_processed,
            order_ref,
            patch_with_retry,
            record_processed,
            to_json,
        },
    },
    events::{EventProducers, OrderSettledEvent, PaymentSettledEvent},
    fees::{decompose, FeeInputs},
    gateway_types::{ChargeCaptured, NewTransfer},
    helpers::{unique_code, PAYMENT_CODE_PREFIX},
    patch::{DocPath, PatchOp},
    traits::{DocumentStore, Notifier, PaymentGateway, Predicate, PublishOptions, Scope, StoreError},
};

pub const CHARGE_CAPTURED: &str = "charge.captured";

/// A line selected for settlement.
#[derive(Debug, Clone)]
pub(crate) struct PlannedLine {
    pub line: OrderLine,
    pub reference: Option<DocRef>,
    /// The authoritative price, when a provisional price was replaced
    pub repriced: Option<Money>,
}

impl PlannedLine {
    /// Once a line is settled its charge entry is no longer pending, and the settled charge is used instead.
    fn price(&self) -> Option<&Money> {
        self.repriced
            .as_ref()
            .or_else(|| self.line.pending_charge().or_else(|| self.line.latest_charge()).map(|(_, e)| &e.price))
    }

    pub fn amount(&self) -> Cents {
        self.price().map(|p| p.amount).unwrap_or_default()
    }

    pub fn units(&self) -> u32 {
        self.price().map(|p| p.units()).unwrap_or_default()
    }

    pub fn require_ref(&self, order: &OrderId) -> Result<&DocRef, EngineError> {
        self.reference
            .as_ref()
            .ok_or_else(|| EngineError::UnresolvedReference { order: order.clone(), line: self.line.id.clone() })
    }
}

/// Resolves a line's reference against its order, and flags lines whose reference points somewhere their target
/// does not expect.
pub(crate) fn planned_line(order: &Order, line: &OrderLine) -> PlannedLine {
    let reference = line.reference.resolve(order.reference.as_ref());
    if let Some(r) = &reference {
        let expected = line.target.expected_container();
        if r.container != expected {
            warn!(
                "💳️ Line {} of order {} is a {} line but references {r}. Expected a reference into {expected}.",
                line.id,
                order.id,
                line.target.label()
            );
        }
    }
    PlannedLine { line: line.clone(), reference, repriced: None }
}

/// The inventory a line draws on, if any.
pub(crate) async fn inventory_location<S: DocumentStore>(
    planned: &PlannedLine,
    order: &OrderId,
    inventory: &InventoryApi<S>,
) -> Result<Option<InventoryLocation>, EngineError> {
    match &planned.line.target {
        LineTarget::ProductPurchase { variant_id: Some(v) } => Ok(Some(InventoryLocation::Variant(v.clone()))),
        LineTarget::TourBooking { session_id, ticket_id } => {
            let booking = planned.require_ref(order)?;
            inventory.resolve_tour_ticket(booking, session_id, ticket_id).await.map(Some)
        },
        _ => Ok(None),
    }
}

/// The charge a settlement is attached to. Both ids are absent for free settlements.
#[derive(Debug, Clone, Copy, Default)]
struct ChargeRef<'a> {
    charge_id: Option<&'a str>,
    payment_intent_id: Option<&'a str>,
}

/// What a commit settled, and the charge it settled against.
struct Committed<'a> {
    settled: Vec<PlannedLine>,
    payment: Option<Payment>,
    charge: ChargeRef<'a>,
}

/// Everything about a payment except its friendly code, which is drawn against the order at write time.
#[derive(Debug, Clone)]
struct PaymentDraft {
    id: PaymentId,
    charge_id: String,
    payment_intent_id: Option<String>,
    payment_method: Option<PaymentMethod>,
    merchant_id: MerchantId,
    fees: FeeBreakdown,
    created_at: DateTime<Utc>,
}

impl PaymentDraft {
    fn into_payment(self, code: String) -> Payment {
        Payment {
            id: self.id,
            code,
            charge_id: self.charge_id,
            payment_intent_id: self.payment_intent_id,
            payment_method: self.payment_method,
            merchant_id: self.merchant_id,
            fees: self.fees,
            created_at: self.created_at,
        }
    }
}

/// Customer and merchant email templates per target family.
fn email_templates(family: TargetFamily) -> Option<(&'static str, &'static str)> {
    match family {
        TargetFamily::Case => Some(("case-payment-confirmed", "case-payment-received")),
        TargetFamily::Product => Some(("order-confirmation", "new-order")),
        TargetFamily::Service => Some(("service-booking-confirmed", "service-booked")),
        TargetFamily::Listing => None,
    }
}

fn line_path(id: &LineId) -> DocPath {
    DocPath::root().key("lines").id(id)
}

pub struct SettlementApi<S, G, N> {
    store: S,
    gateway: G,
    notifier: N,
    config: EngineConfig,
    producers: EventProducers,
    inventory: InventoryApi<S>,
}

impl<S, G, N> Debug for SettlementApi<S, G, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi ({:?})", self.config)
    }
}

impl<S, G, N> SettlementApi<S, G, N>
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

    /// Settles a captured charge against its order.
    ///
    /// Fails with [`EngineError::OrderNotFound`], [`EngineError::MerchantNotFound`] or
    /// [`EngineError::MerchantAccountMissing`] before touching anything. Replaying a processed event returns a
    /// receipt marked `duplicate`.
    pub async fn settle_capture(&self, event: &ChargeCaptured) -> Result<SettlementReceipt, EngineError> {
        let meta = &event.metadata;
        let order_id = &meta.order_id;
        if is_processed(&self.store, &event.event_id).await? {
            info!("💳️ Capture {} for order {order_id} has already been processed", event.event_id);
            return Ok(SettlementReceipt::duplicate(order_id, &event.event_id));
        }
        let (_, order) = fetch_order(&self.store, order_id).await?;
        let vendor = self.fetch_vendor(&meta.merchant_id).await?;
        if vendor.stripe_account.is_none() {
            return Err(EngineError::MerchantAccountMissing(meta.merchant_id.clone()));
        }
        let actor = format!("settlement:{}", event.charge_id);
        let retries = self.config.patch_retries;
        let charge =
            ChargeRef { charge_id: Some(&event.charge_id), payment_intent_id: event.payment_intent_id.as_deref() };
        let lease = self.config.follow_up_lease;
        let mut follow_up = FollowUp::for_event(&self.store, &order, &event.event_id, &actor, retries, lease);

        if let Some(marker) = order.pending_effects(&event.event_id) {
            info!(
                "💳️ Capture {} was committed to order {order_id} but did not finish. Resuming its follow-up.",
                event.event_id
            );
            follow_up.take_over().await?;
            let settled = marker.lines.iter().filter_map(|id| order.line(id)).map(|l| planned_line(&order, l));
            let payment = marker.payment_id.as_ref().and_then(|id| order.payments.iter().find(|p| &p.id == id));
            let committed = Committed { settled: settled.collect(), payment: payment.cloned(), charge };
            return self.finish_settlement(&order, &vendor, committed, &actor, follow_up, EffectLog::default()).await;
        }

        let mut effects = EffectLog::default();
        let mut planned = self.plan(&order, &meta.merchant_id, |_| true);
        if planned.is_empty() {
            info!("💳️ Order {order_id} has no lines awaiting charge for merchant {}", meta.merchant_id);
            record_processed(&self.store, &event.event_id, CHARGE_CAPTURED, order_id, &actor).await?;
            let mut receipt = SettlementReceipt::new(order_id, Some(&event.event_id), effects);
            receipt.fully_settled = order.is_fully_settled();
            return Ok(receipt);
        }
        debug!("💳️ Settling {} lines of order {order_id} for charge {}", planned.len(), event.charge_id);
        self.reprice(&order.id, &mut planned).await?;
        self.dispatch(&order, &planned, charge, &actor, &mut effects).await?;

        let details = self.gateway.retrieve_charge(&event.charge_id, meta.account.as_deref()).await?;
        let base = planned.iter().map(PlannedLine::amount).sum::<Cents>();
        let inputs = FeeInputs {
            charge: &details,
            order_tax: meta.tax_amount,
            shipping: meta.shipping.as_ref(),
            platform: self.config.fees.derive_fees(base),
        };
        let fees = decompose(&inputs)?;
        let draft = PaymentDraft {
            id: PaymentId::for_charge(&event.charge_id),
            charge_id: event.charge_id.clone(),
            payment_intent_id: event.payment_intent_id.clone().or_else(|| details.payment_intent_id.clone()),
            payment_method: details.payment_method.clone(),
            merchant_id: meta.merchant_id.clone(),
            fees,
            created_at: Utc::now(),
        };
        let (lines, payment) = self.commit(order_id, &planned, Some(draft), &follow_up, &actor).await?;
        if lines.is_empty() {
            info!("💳️ Another delivery of capture {} settled order {order_id} first", event.event_id);
            follow_up.finish().await?;
            record_processed(&self.store, &event.event_id, CHARGE_CAPTURED, order_id, &actor).await?;
            let (_, order) = fetch_order(&self.store, order_id).await?;
            let mut receipt = SettlementReceipt::new(order_id, Some(&event.event_id), effects);
            receipt.fully_settled = order.is_fully_settled();
            return Ok(receipt);
        }
        if let Some(p) = &payment {
            info!("💳️ Payment {} ({}) recorded on order {order_id} for {} lines", p.id, p.code, lines.len());
        }
        let settled = planned.into_iter().filter(|p| lines.contains(&p.line.id)).collect();
        let committed = Committed { settled, payment, charge };
        self.finish_settlement(&order, &vendor, committed, &actor, follow_up, effects).await
    }

    /// Settles the merchant's zero-priced lines, for which the gateway never sends a capture.
    ///
    /// No payment is recorded and nothing is written to the processed-event ledger; re-running the call finds no
    /// lines left to settle. Lines whose authoritative price turns out not to be zero are left untouched.
    pub async fn settle_without_charge(
        &self,
        order_id: &OrderId,
        merchant_id: &MerchantId,
    ) -> Result<SettlementReceipt, EngineError> {
        let (_, order) = fetch_order(&self.store, order_id).await?;
        let vendor = self.fetch_vendor(merchant_id).await?;
        let actor = format!("settlement:free:{order_id}");
        let mut effects = EffectLog::default();
        let is_free = |l: &OrderLine| l.pending_charge().map(|(_, e)| e.price.amount.is_zero()).unwrap_or(false);
        let mut planned = self.plan(&order, merchant_id, is_free);
        self.reprice(order_id, &mut planned).await?;
        planned.retain(|p| {
            let free = p.amount().is_zero();
            if !free {
                warn!(
                    "💳️ Line {} of order {order_id} is priced at {} and cannot be settled without a charge",
                    p.line.id,
                    p.amount()
                );
            }
            free
        });
        if planned.is_empty() {
            info!("💳️ Order {order_id} has no free lines awaiting settlement for merchant {merchant_id}");
            let mut receipt = SettlementReceipt::new(order_id, None, effects);
            receipt.fully_settled = order.is_fully_settled();
            return Ok(receipt);
        }
        let charge = ChargeRef::default();
        self.dispatch(&order, &planned, charge, &actor, &mut effects).await?;
        let follow_up = FollowUp::untracked(&self.store, order_id, &actor, self.config.patch_retries);
        let (lines, _) = self.commit(order_id, &planned, None, &follow_up, &actor).await?;
        info!("💳️ {} free lines of order {order_id} settled", lines.len());

        let settled = planned.into_iter().filter(|p| lines.contains(&p.line.id)).collect();
        let committed = Committed { settled, payment: None, charge };
        self.finish_settlement(&order, &vendor, committed, &actor, follow_up, effects).await
    }

    /// Steps 5 and 6: line side effects, the full-settlement check and notifications, then the ledger. If any of it
    /// fails, the delivery's lease on the follow-up is released before the error is returned.
    async fn finish_settlement(
        &self,
        order: &Order,
        vendor: &Vendor,
        committed: Committed<'_>,
        actor: &str,
        mut follow_up: FollowUp<'_, S>,
        mut effects: EffectLog,
    ) -> Result<SettlementReceipt, EngineError> {
        let Committed { settled, payment, charge } = committed;
        let outcome = async {
            self.apply_line_effects(order, &settled, charge, actor, &mut effects, &mut follow_up).await?;
            let fully_settled = self.check_full_settlement(&order.id, actor, &mut effects, &mut follow_up).await?;
            self.notify_settlement(order, vendor, &settled, payment.as_ref(), &mut effects, &mut follow_up).await?;
            follow_up.finish().await?;
            Ok::<_, EngineError>(fully_settled)
        }
        .await;
        let fully_settled = match outcome {
            Ok(fully_settled) => fully_settled,
            Err(e) => {
                follow_up.release().await;
                return Err(e);
            },
        };

        let event_id = follow_up.event_id().map(String::from);
        if let Some(event_id) = &event_id {
            record_processed(&self.store, event_id, CHARGE_CAPTURED, &order.id, actor).await?;
        }
        let lines = settled.into_iter().map(|p| p.line.id).collect::<Vec<_>>();
        let hook = PaymentSettledEvent {
            order_id: order.id.clone(),
            merchant_id: vendor.id.clone(),
            payment: payment.clone(),
            lines: lines.clone(),
        };
        self.producers.payment_settled(hook).await;

        let mut receipt = SettlementReceipt::new(&order.id, event_id.as_deref(), effects);
        receipt.lines = lines;
        receipt.payment = payment;
        receipt.fully_settled = fully_settled;
        Ok(receipt)
    }

    async fn fetch_vendor(&self, merchant_id: &MerchantId) -> Result<Vendor, EngineError> {
        let vendor_ref = DocRef::own_partition(Container::Vendors, merchant_id.as_str());
        match fetch_parsed::<_, Vendor>(&self.store, &vendor_ref).await {
            Ok((_, vendor)) => Ok(vendor),
            Err(EngineError::DocumentNotFound { .. }) => Err(EngineError::MerchantNotFound(merchant_id.clone())),
            Err(e) => Err(e),
        }
    }

    //------------------------------------------   Planning   ---------------------------------------------------------
    fn plan<F>(&self, order: &Order, merchant: &MerchantId, mut include: F) -> Vec<PlannedLine>
    where F: FnMut(&OrderLine) -> bool {
        order
            .lines
            .iter()
            .filter(|l| &l.merchant_id == merchant && l.is_awaiting_charge() && include(l))
            .map(|line| planned_line(order, line))
            .collect()
    }

    /// Replaces provisional prices with the price published on the referenced document.
    async fn reprice(&self, order_id: &OrderId, planned: &mut [PlannedLine]) -> Result<(), EngineError> {
        for p in planned.iter_mut().filter(|p| p.line.provisional) {
            let Some((_, charge)) = p.line.pending_charge() else { continue };
            let charge = charge.price.clone();
            let unit = match self.authoritative_price(order_id, p).await {
                Ok(Some(unit)) => unit,
                Ok(None) => {
                    warn!(
                        "💳️ No authoritative price for provisional line {} of order {order_id}. Keeping the captured \
                         price of {}.",
                        p.line.id, charge.amount
                    );
                    continue;
                },
                Err(EngineError::DocumentNotFound { container, id }) => {
                    warn!(
                        "💳️ Cannot reprice line {} of order {order_id}: {container}/{id} does not exist. Keeping the \
                         captured price.",
                        p.line.id
                    );
                    continue;
                },
                Err(e) => return Err(e),
            };
            if unit.currency != charge.currency {
                warn!(
                    "💳️ Line {} of order {order_id} was captured in {} but is priced in {}. Keeping the captured \
                     price.",
                    p.line.id, charge.currency, unit.currency
                );
                continue;
            }
            let price = unit.times(charge.quantity);
            if price.amount != charge.amount {
                info!("💳️ Line {} of order {order_id} repriced from {} to {}", p.line.id, charge.amount, price.amount);
            }
            p.repriced = Some(price);
        }
        Ok(())
    }

    async fn authoritative_price(
        &self,
        order_id: &OrderId,
        planned: &PlannedLine,
    ) -> Result<Option<UnitPrice>, EngineError> {
        match &planned.line.target {
            LineTarget::ProductPurchase { variant_id } => {
                let (_, listing) = fetch_parsed::<_, Listing>(&self.store, planned.require_ref(order_id)?).await?;
                let variant_price = variant_id.as_ref().and_then(|v| listing.variant(v)).map(|v| v.price.clone());
                Ok(variant_price.or(listing.price))
            },
            LineTarget::TourBooking { session_id, ticket_id } => {
                let booking = planned.require_ref(order_id)?;
                let location = self.inventory.resolve_tour_ticket(booking, session_id, ticket_id).await?;
                let InventoryLocation::TourTicket { listing, variant } = location else { return Ok(None) };
                let (_, listing) = fetch_parsed::<_, Listing>(&self.store, &listing).await?;
                Ok(listing.ticket_type(&variant).map(|t| t.price.clone()))
            },
            LineTarget::ServicePurchase { .. } => {
                let (_, service) = fetch_parsed::<_, Service>(&self.store, planned.require_ref(order_id)?).await?;
                Ok(Some(service.price))
            },
            _ => {
                let doc = fetch_required(&self.store, planned.require_ref(order_id)?).await?;
                match doc.body.get("price") {
                    Some(price) => Ok(Some(serde_json::from_value(price.clone())?)),
                    None => Ok(None),
                }
            },
        }
    }

    //------------------------------------------   Dispatch   ---------------------------------------------------------
    async fn dispatch(
        &self,
        order: &Order,
        planned: &[PlannedLine],
        charge: ChargeRef<'_>,
        actor: &str,
        effects: &mut EffectLog,
    ) -> Result<(), EngineError> {
        for p in planned {
            let line_id = &p.line.id;
            match &p.line.target {
                LineTarget::TourBooking { session_id, ticket_id } => {
                    let result = match p.require_ref(&order.id) {
                        Ok(booking) => self.mark_ticket_paid(booking, session_id, ticket_id, charge, actor).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(true) => effects.applied(EffectKind::TourTicket, line_id),
                        Ok(false) => effects.skipped(EffectKind::TourTicket, line_id, "ticket already paid"),
                        Err(e) => effects.failed(EffectKind::TourTicket, line_id, e),
                    }
                },
                LineTarget::CaseOfferRelease { offer_id } => {
                    let case = p.require_ref(&order.id)?;
                    self.accept_offer(case, offer_id, actor, effects).await?;
                    self.set_case_status(case, CaseStatus::ActiveReleased, actor, effects).await?;
                    self.void_sibling_invoices(order, case, actor, effects).await?;
                },
                LineTarget::CaseOfferClose { offer_id } => {
                    let case = p.require_ref(&order.id)?;
                    self.accept_offer(case, offer_id, actor, effects).await?;
                    self.set_case_status(case, CaseStatus::Closed, actor, effects).await?;
                },
                LineTarget::CaseCreate => {
                    let case = p.require_ref(&order.id)?;
                    self.set_case_status(case, CaseStatus::New, actor, effects).await?;
                },
                LineTarget::ListingFee => {
                    let listing = p.require_ref(&order.id)?;
                    self.clear_listing_fee(listing, actor, effects).await?;
                },
                LineTarget::CaseInvoiceLine
                | LineTarget::ProductPurchase { .. }
                | LineTarget::ServicePurchase { .. } => {
                    trace!("💳️ Nothing to dispatch for {} line {line_id}", p.line.target.label());
                },
            }
        }
        Ok(())
    }

    /// Marks a booked ticket as paid. Returns false if it already was.
    async fn mark_ticket_paid(
        &self,
        booking_ref: &DocRef,
        session_id: &str,
        ticket_id: &str,
        charge: ChargeRef<'_>,
        actor: &str,
    ) -> Result<bool, EngineError> {
        let ticket_path = DocPath::root().key("sessions").id(session_id).key("tickets").id(ticket_id);
        let outcome = patch_with_retry(&self.store, booking_ref, actor, self.config.patch_retries, |doc| {
            let booking = doc.parse::<Booking>()?;
            let ticket = booking.ticket(session_id, ticket_id).ok_or_else(|| EngineError::DocumentNotFound {
                container: Container::Bookings,
                id: format!("{}/sessions/{session_id}/tickets/{ticket_id}", booking.id),
            })?;
            if ticket.is_paid() {
                return Ok(vec![]);
            }
            let mut ops = vec![];
            if let Some(id) = charge.charge_id {
                ops.push(PatchOp::set(ticket_path.clone().key("charge_id"), json!(id)));
            }
            if let Some(id) = charge.payment_intent_id {
                ops.push(PatchOp::set(ticket_path.clone().key("payment_intent_id"), json!(id)));
            }
            let entry = TicketStatusEntry { label: PaidStatus::Paid, at: Utc::now() };
            ops.push(PatchOp::prepend(ticket_path.clone().key("status_log"), to_json(&entry)?));
            Ok(ops)
        })
        .await?;
        if outcome.applied {
            info!("💳️ Ticket {ticket_id} of session {session_id} on {booking_ref} is paid");
        }
        Ok(outcome.applied)
    }

    async fn accept_offer(
        &self,
        case: &DocRef,
        offer_id: &str,
        actor: &str,
        effects: &mut EffectLog,
    ) -> Result<(), EngineError> {
        let offer_ref = DocRef::new(Container::CaseOffers, offer_id, case.id.as_str());
        let outcome = patch_with_retry(&self.store, &offer_ref, actor, self.config.patch_retries, |doc| {
            let offer = doc.parse::<CaseOffer>()?;
            if offer.status == OfferStatus::Accepted && offer.paid && offer.payment_intent.is_none() {
                return Ok(vec![]);
            }
            Ok(vec![
                PatchOp::set(DocPath::root().key("status"), to_json(&OfferStatus::Accepted)?),
                PatchOp::set(DocPath::root().key("paid"), json!(true)),
                PatchOp::remove(DocPath::root().key("payment_intent")),
            ])
        })
        .await?;
        if outcome.applied {
            info!("💳️ Offer {offer_id} on case {} accepted and paid", case.id);
            effects.applied(EffectKind::CaseOffer, offer_id);
        } else {
            effects.skipped(EffectKind::CaseOffer, offer_id, "offer already accepted");
        }
        Ok(())
    }

    async fn set_case_status(
        &self,
        case_ref: &DocRef,
        status: CaseStatus,
        actor: &str,
        effects: &mut EffectLog,
    ) -> Result<(), EngineError> {
        let outcome = patch_with_retry(&self.store, case_ref, actor, self.config.patch_retries, |doc| {
            let case = doc.parse::<Case>()?;
            if case.status == status && case.payment_intent.is_none() {
                return Ok(vec![]);
            }
            Ok(vec![
                PatchOp::set(DocPath::root().key("status"), to_json(&status)?),
                PatchOp::remove(DocPath::root().key("payment_intent")),
            ])
        })
        .await?;
        if outcome.applied {
            info!("💳️ Case {} is now {status:?}", case_ref.id);
            effects.applied(EffectKind::CaseStatus, &case_ref.id);
        } else {
            effects.skipped(EffectKind::CaseStatus, &case_ref.id, format!("case is already {status:?}"));
        }
        Ok(())
    }

    /// Once an offer on a case is released, the case's other outstanding invoices can never be paid. Their unpaid
    /// lines are voided and the orders are given a short ttl.
    async fn void_sibling_invoices(
        &self,
        order: &Order,
        case: &DocRef,
        actor: &str,
        effects: &mut EffectLog,
    ) -> Result<(), EngineError> {
        let predicate = Predicate::eq("/reference/id", case.id.as_str()).and("/reference/container", "cases");
        let siblings = self.store.query(Container::Orders, &predicate, &Scope::CrossPartition).await?;
        let ttl = i64::try_from(self.config.void_invoice_grace_ttl.as_secs()).unwrap_or(i64::MAX);
        for sibling in siblings.into_iter().filter(|d| d.id != order.id.as_str()) {
            let sibling_ref = sibling.doc_ref();
            let result = patch_with_retry(&self.store, &sibling_ref, actor, self.config.patch_retries, |doc| {
                let other = doc.parse::<Order>()?;
                if !other.is_unpaid() {
                    return Ok(vec![]);
                }
                let mut ops = other
                    .lines
                    .iter()
                    .filter(|l| l.current_paid_status().map(|s| s.is_unpaid()).unwrap_or(true))
                    .map(|l| -> Result<PatchOp, EngineError> {
                        let entry = to_json(&PaidStatusEntry::new(PaidStatus::Void, actor))?;
                        Ok(PatchOp::prepend(line_path(&l.id).key("paid_status_log"), entry))
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                if !ops.is_empty() {
                    ops.push(PatchOp::set(DocPath::root().key("ttl"), json!(ttl)));
                }
                Ok(ops)
            })
            .await;
            match result {
                Ok(outcome) if outcome.applied => {
                    info!("💳️ Invoice {} on case {} voided; it expires in {ttl}s", sibling.id, case.id);
                    effects.applied(EffectKind::VoidInvoice, &sibling.id);
                },
                Ok(_) => effects.skipped(EffectKind::VoidInvoice, &sibling.id, "invoice is not unpaid"),
                Err(e) => effects.failed(EffectKind::VoidInvoice, &sibling.id, e),
            }
        }
        Ok(())
    }

    async fn clear_listing_fee(
        &self,
        listing: &DocRef,
        actor: &str,
        effects: &mut EffectLog,
    ) -> Result<(), EngineError> {
        let outcome = patch_with_retry(&self.store, listing, actor, self.config.patch_retries, |doc| {
            let pending = ["setup_intent_secret", "ttl"].into_iter().filter(|k| doc.body.get(*k).is_some());
            Ok(pending.map(|k| PatchOp::remove(DocPath::root().key(k))).collect())
        })
        .await?;
        if outcome.applied {
            info!("💳️ Listing fee for {} is paid. The listing no longer expires.", listing.id);
            effects.applied(EffectKind::ListingFee, &listing.id);
        } else {
            effects.skipped(EffectKind::ListingFee, &listing.id, "listing fee already settled");
        }
        Ok(())
    }

    //------------------------------------------    Commit    ---------------------------------------------------------
    /// Flips the planned lines to PAID and records the payment, in one patch against the order. When the commit is
    /// for a gateway event, the same patch leaves the event's follow-up marker, claimed by `follow_up`.
    ///
    /// Line state is re-checked against the freshly read order on every attempt, so a line that was settled by a
    /// concurrent delivery is left alone. Returns the lines that this call settled.
    async fn commit(
        &self,
        order_id: &OrderId,
        planned: &[PlannedLine],
        draft: Option<PaymentDraft>,
        follow_up: &FollowUp<'_, S>,
        actor: &str,
    ) -> Result<(Vec<LineId>, Option<Payment>), EngineError> {
        let mut committed = (vec![], None);
        let retries = self.config.patch_retries;
        patch_with_retry(&self.store, &order_ref(order_id), actor, retries, |doc| {
            committed = (vec![], None);
            let order = doc.parse::<Order>()?;
            let mut ops = vec![];
            let mut lines = vec![];
            for p in planned {
                let Some(line) = order.line(&p.line.id) else {
                    warn!("💳️ Line {} has disappeared from order {order_id}", p.line.id);
                    continue;
                };
                if !line.is_awaiting_charge() {
                    debug!("💳️ Line {} of order {order_id} was settled concurrently", line.id);
                    continue;
                }
                let Some((index, _)) = line.pending_charge() else {
                    warn!("💳️ Line {} of order {order_id} is awaiting charge but has no pending charge", line.id);
                    continue;
                };
                let path = line_path(&line.id);
                let entry = path.clone().key("price_log").index(index);
                if let (true, Some(r)) = (line.reference.is_inherit(), &p.reference) {
                    ops.push(PatchOp::set(path.clone().key("reference"), to_json(&LineRef::Concrete(r.clone()))?));
                }
                if let Some(price) = &p.repriced {
                    ops.push(PatchOp::set(entry.clone().key("price"), to_json(price)?));
                    ops.push(PatchOp::set(path.clone().key("provisional"), json!(false)));
                }
                ops.push(PatchOp::set(entry.clone().key("status"), to_json(&PriceStatus::Success)?));
                if let Some(d) = &draft {
                    ops.push(PatchOp::set(entry.key("payment_id"), to_json(&d.id)?));
                }
                let paid = to_json(&PaidStatusEntry::new(PaidStatus::Paid, actor))?;
                ops.push(PatchOp::prepend(path.key("paid_status_log"), paid));
                lines.push(line.id.clone());
            }
            let mut payment = None;
            if let Some(d) = draft.as_ref().filter(|d| !lines.is_empty() && !order.has_payment(&d.id)) {
                let taken = order.payments.iter().map(|p| p.code.as_str()).collect::<HashSet<_>>();
                let code = unique_code(PAYMENT_CODE_PREFIX, &taken, self.config.payment_code_attempts, d.id.as_str());
                let p = d.clone().into_payment(code);
                ops.push(PatchOp::prepend(DocPath::root().key("payments"), to_json(&p)?));
                payment = Some(p);
            }
            if !lines.is_empty() && follow_up.own_marker(&order)?.is_none() {
                if let Some(mut marker) = follow_up.new_marker(CHARGE_CAPTURED) {
                    marker.lines = lines.clone();
                    marker.payment_id = draft.as_ref().map(|d| d.id.clone());
                    ops.push(add_marker(&marker)?);
                }
            }
            committed = (lines, payment);
            Ok(ops)
        })
        .await?;
        Ok(committed)
    }

    //------------------------------------------   Effects    ---------------------------------------------------------
    /// Inventory, service bookings and featuring transfers. Best-effort, except that a failure to record progress on
    /// the follow-up marker aborts the event.
    async fn apply_line_effects(
        &self,
        order: &Order,
        settled: &[PlannedLine],
        charge: ChargeRef<'_>,
        actor: &str,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        for p in settled {
            let done_key = format!("inventory:{}", p.line.id);
            match inventory_location(p, &order.id, &self.inventory).await {
                Ok(Some(location)) if follow_up.is_done(&done_key) => {
                    effects.skipped(EffectKind::Inventory, location.variant(), "already adjusted for this event")
                },
                Ok(Some(location)) => {
                    let result =
                        self.inventory.decrement(&location, p.units(), AdjustmentReason::Sale, &order.id, actor).await;
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
                Err(e) => effects.failed(EffectKind::Inventory, &p.line.id, e),
            }
            if let LineTarget::ServicePurchase { featuring } = &p.line.target {
                self.book_service(order, p, actor, effects).await;
                if let Some(featuring) = featuring {
                    let subject = format!("{}→{}", p.line.id, featuring.merchant_id);
                    let done_key = format!("transfer:{}", p.line.id);
                    match charge.charge_id {
                        _ if follow_up.is_done(&done_key) => {
                            effects.skipped(EffectKind::FeaturingTransfer, subject, "already transferred")
                        },
                        Some(charge_id) => {
                            let result = self.pay_featuring_share(order, p, featuring, charge_id).await;
                            if let Err(e) = &result {
                                error!(
                                    "💳️ Featuring transfer for line {} of order {} to merchant {} failed. {e}",
                                    p.line.id, order.id, featuring.merchant_id
                                );
                            }
                            let transferred = result.is_ok();
                            effects.record(EffectKind::FeaturingTransfer, subject, result);
                            if transferred {
                                follow_up.mark_done(done_key).await?;
                            }
                        },
                        None => effects.skipped(EffectKind::FeaturingTransfer, subject, "no charge to transfer from"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn book_service(&self, order: &Order, planned: &PlannedLine, actor: &str, effects: &mut EffectLog) {
        let line_id = &planned.line.id;
        let id = ServiceBooking::id_for(&order.id, line_id);
        let service = match planned.require_ref(&order.id) {
            Ok(r) => r.clone(),
            Err(e) => return effects.failed(EffectKind::ServiceBooking, &id, e),
        };
        let booking = ServiceBooking {
            id: id.clone(),
            service,
            order_id: order.id.clone(),
            line_id: line_id.clone(),
            merchant_id: planned.line.merchant_id.clone(),
            customer_email: order.customer_email.clone(),
            created_at: Utc::now(),
        };
        let body = match to_json(&booking) {
            Ok(b) => b,
            Err(e) => return effects.failed(EffectKind::ServiceBooking, &id, e),
        };
        let partition = planned.line.merchant_id.as_str();
        match self.store.insert(Container::ServiceBookings, body, partition, actor).await {
            Ok(_) => {
                info!("💳️ Service booking {id} created");
                effects.applied(EffectKind::ServiceBooking, &id);
            },
            Err(StoreError::AlreadyExists { .. }) => effects.skipped(EffectKind::ServiceBooking, &id, "already booked"),
            Err(e) => effects.failed(EffectKind::ServiceBooking, &id, e),
        }
    }

    async fn pay_featuring_share(
        &self,
        order: &Order,
        planned: &PlannedLine,
        featuring: &Featuring,
        charge_id: &str,
    ) -> Result<(), EngineError> {
        let referrer = self.fetch_vendor(&featuring.merchant_id).await?;
        let destination =
            referrer.stripe_account.ok_or_else(|| EngineError::MerchantAccountMissing(featuring.merchant_id.clone()))?;
        let amount = planned.amount().basis_points_floor(featuring.share_bps);
        if amount.is_zero() {
            debug!("💳️ Featuring share on line {} rounds to zero. No transfer made.", planned.line.id);
            return Ok(());
        }
        let currency = planned.price().map(|p| p.currency.clone()).unwrap_or_default();
        let transfer = NewTransfer {
            amount,
            currency,
            destination,
            transfer_group: order.id.to_string(),
            source_transaction: charge_id.to_string(),
        };
        let receipt = self.gateway.create_transfer(transfer).await?;
        info!(
            "💳️ Transferred {} to {} for featuring on line {} of order {} ({})",
            receipt.amount, receipt.destination, planned.line.id, order.id, receipt.id
        );
        Ok(())
    }

    /// Re-reads the order. If every line is now paid, discards the shipping rate quotes and announces the settlement.
    async fn check_full_settlement(
        &self,
        order_id: &OrderId,
        actor: &str,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<bool, EngineError> {
        let (_, order) = fetch_order(&self.store, order_id).await?;
        if !order.is_fully_settled() {
            debug!("💳️ Order {order_id} still has unsettled lines");
            return Ok(false);
        }
        info!("💳️ Order {order_id} is fully settled");
        let order = self.compress_rates(order, actor, effects).await;
        let customer = order.customer_email.clone();
        let payload = json!({ "order_id": order.id, "code": order.code });
        self.producers.order_settled(OrderSettledEvent::new(order)).await;
        self.publish_once("purchase-confirmed", payload, PublishOptions::upsert_to_group(&customer), effects, follow_up)
            .await?;
        Ok(true)
    }

    /// Publishes `topic` unless the follow-up already did.
    async fn publish_once(
        &self,
        topic: &str,
        payload: serde_json::Value,
        options: PublishOptions,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        if follow_up.is_done(topic) {
            effects.skipped(EffectKind::Notification, topic, "already published for this event");
            return Ok(());
        }
        let result = self.notifier.publish(topic, payload, options).await;
        let published = result.is_ok();
        effects.record(EffectKind::Notification, topic, result);
        if published {
            follow_up.mark_done(topic.to_string()).await?;
        }
        Ok(())
    }

    async fn compress_rates(&self, order: Order, actor: &str, effects: &mut EffectLog) -> Order {
        if order.shipments.iter().all(|s| s.carrier_rates.is_none()) {
            return order;
        }
        let retries = self.config.patch_retries;
        let result = patch_with_retry(&self.store, &order_ref(&order.id), actor, retries, |doc| {
            let current = doc.parse::<Order>()?;
            let mut ops = vec![];
            for shipment in current.shipments.iter().filter(|s| s.carrier_rates.is_some()) {
                let path = DocPath::root().key("shipments").id(&shipment.id);
                if let Some(summary) = shipment.summarize_rates() {
                    ops.push(PatchOp::set(path.clone().key("rate_summary"), to_json(&summary)?));
                }
                ops.push(PatchOp::remove(path.key("carrier_rates")));
            }
            Ok(ops)
        })
        .await;
        match result {
            Ok(outcome) => {
                effects.applied(EffectKind::RateSummary, &order.id);
                outcome.document.parse::<Order>().unwrap_or(order)
            },
            Err(e) => {
                effects.failed(EffectKind::RateSummary, &order.id, e);
                order
            },
        }
    }

    async fn notify_settlement(
        &self,
        order: &Order,
        vendor: &Vendor,
        settled: &[PlannedLine],
        payment: Option<&Payment>,
        effects: &mut EffectLog,
        follow_up: &mut FollowUp<'_, S>,
    ) -> Result<(), EngineError> {
        if settled.is_empty() {
            return Ok(());
        }
        let lines = settled.iter().map(|p| &p.line.id).collect::<Vec<_>>();
        let payload = json!({
            "order_id": order.id,
            "code": order.code,
            "lines": lines,
            "payment_code": payment.map(|p| &p.code),
        });
        let options = PublishOptions::upsert_to_group(&order.customer_email);
        self.publish_once("payment-confirmed", payload.clone(), options, effects, follow_up).await?;

        let families = settled.iter().map(|p| p.line.target.family()).collect::<BTreeSet<_>>();
        for (customer_template, merchant_template) in families.into_iter().filter_map(email_templates) {
            let recipients = [(customer_template, &order.customer_email), (merchant_template, &vendor.email)];
            for (template, recipient) in recipients {
                let subject = format!("{template}→{recipient}");
                if follow_up.is_done(&subject) {
                    effects.skipped(EffectKind::Email, subject, "already sent for this event");
                    continue;
                }
                let result = self.notifier.send_templated_email(template, recipient, payload.clone()).await;
                let sent = result.is_ok();
                effects.record(EffectKind::Email, &subject, result);
                if sent {
                    follow_up.mark_done(subject).await?;
                }
            }
        }
        Ok(())
    }
}
