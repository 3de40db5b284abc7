use chrono::{DateTime, Utc};
use mkt_common::Cents;
use serde::{Deserialize, Serialize};

use super::{
    Container,
    Credit,
    CreditId,
    Currency,
    DocRef,
    HeadLog,
    LineId,
    LineRef,
    MerchantId,
    Money,
    OrderId,
    Payment,
    PaymentId,
    VariantId,
};

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-readable order code
    pub code: String,
    pub customer_email: String,
    /// The domain object the order as a whole pays for. Lines with an `Inherit` reference resolve to this.
    #[serde(default)]
    pub reference: Option<DocRef>,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub payments: HeadLog<Payment>,
    #[serde(default)]
    pub credits: HeadLog<Credit>,
    #[serde(default)]
    pub shipments: Vec<Shipment>,
    /// Soft expiry in seconds, for unpaid orders that should eventually disappear.
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Follow-up work owed by events whose line changes are committed but which have not finished.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects_pending: Vec<PendingEffects>,
}

impl Order {
    /// Orders are their own partition.
    pub fn partition(&self) -> &str {
        self.id.as_str()
    }

    pub fn line(&self, id: &LineId) -> Option<&OrderLine> {
        self.lines.iter().find(|l| &l.id == id)
    }

    pub fn has_payment(&self, id: &PaymentId) -> bool {
        self.payments.iter().any(|p| &p.id == id)
    }

    pub fn has_credit(&self, id: &CreditId) -> bool {
        self.credits.iter().any(|c| &c.id == id)
    }

    /// True when every line's current paid status is `PAID`. An order without lines is never settled.
    pub fn is_fully_settled(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.current_paid_status() == Some(PaidStatus::Paid))
    }

    /// True when no line has been paid, refunded or otherwise settled yet.
    pub fn is_unpaid(&self) -> bool {
        self.lines.iter().all(|l| l.current_paid_status().map(|s| s.is_unpaid()).unwrap_or(true))
    }

    pub fn references_case(&self) -> Option<&DocRef> {
        self.reference.as_ref().filter(|r| r.container == Container::Cases)
    }

    pub fn pending_effects(&self, event_id: &str) -> Option<&PendingEffects> {
        self.effects_pending.iter().find(|p| p.id == event_id)
    }
}

/// Written in the same patch that commits an event's line changes, and removed once the event's side effects and
/// notifications have run. A redelivered event that finds its marker picks up where the last attempt stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEffects {
    /// The gateway event id
    pub id: String,
    pub kind: String,
    /// The lines the event settled or credited
    #[serde(default)]
    pub lines: Vec<LineId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    #[serde(default)]
    pub credits: Vec<CreditId>,
    /// Effects that have been carried out, so that a resumed event does not repeat them
    #[serde(default)]
    pub done: Vec<String>,
    /// The delivery that is working through the effects
    #[serde(default)]
    pub claimed_by: String,
    /// Until then, no other delivery may take the marker over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_until: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl PendingEffects {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            lines: vec![],
            payment_id: None,
            credits: vec![],
            done: vec![],
            claimed_by: String::new(),
            lease_until: None,
            at: Utc::now(),
        }
    }

    /// True while a delivery other than `claim` holds an unexpired lease on the marker.
    pub fn is_leased_to_other(&self, claim: &str, now: DateTime<Utc>) -> bool {
        self.claimed_by != claim && self.lease_until.map(|t| t > now).unwrap_or(false)
    }
}

//--------------------------------------       OrderLine       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: LineId,
    #[serde(default)]
    pub reference: LineRef,
    pub target: LineTarget,
    pub merchant_id: MerchantId,
    /// Set when the line's price was captured before the authoritative price was known.
    #[serde(default)]
    pub provisional: bool,
    #[serde(default)]
    pub price_log: HeadLog<PriceLogEntry>,
    #[serde(default)]
    pub paid_status_log: HeadLog<PaidStatusEntry>,
}

impl OrderLine {
    /// The line's settlement state: the head of `paid_status_log`, or, for lines that have never been through
    /// settlement, the state implied by the head of `price_log`.
    pub fn current_paid_status(&self) -> Option<PaidStatus> {
        if let Some(entry) = self.paid_status_log.current() {
            return Some(entry.label);
        }
        self.price_log.current().and_then(|p| match p.status {
            PriceStatus::AwaitingCharge => Some(PaidStatus::AwaitingCharge),
            PriceStatus::AwaitingPayment => Some(PaidStatus::AwaitingPayment),
            PriceStatus::Success => None,
        })
    }

    pub fn is_awaiting_charge(&self) -> bool {
        self.current_paid_status() == Some(PaidStatus::AwaitingCharge)
    }

    /// The most recent CHARGE entry that has not been settled yet, with its log index.
    pub fn pending_charge(&self) -> Option<(usize, &PriceLogEntry)> {
        self.price_log.entries().find(|(_, e)| e.kind == PriceKind::Charge && e.status != PriceStatus::Success)
    }

    /// The most recent CHARGE entry regardless of status.
    pub fn latest_charge(&self) -> Option<(usize, &PriceLogEntry)> {
        self.price_log.entries().find(|(_, e)| e.kind == PriceKind::Charge)
    }
}

//--------------------------------------      LineTarget       ---------------------------------------------------------
/// What kind of domain object a line settles. Each variant carries only what its settlement needs; the referenced
/// document itself comes from the line's [`LineRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING-KEBAB-CASE")]
pub enum LineTarget {
    /// References a Booking. The session and ticket identify what was bought inside it.
    TourBooking { session_id: String, ticket_id: String },
    /// References the Case being created.
    CaseCreate,
    /// References the Case. The offer lives in `case_offers`, partitioned by case id.
    CaseOfferRelease { offer_id: String },
    CaseOfferClose { offer_id: String },
    CaseInvoiceLine,
    /// References a Listing.
    ProductPurchase {
        #[serde(default)]
        variant_id: Option<VariantId>,
    },
    /// References a Service.
    ServicePurchase {
        #[serde(default)]
        featuring: Option<Featuring>,
    },
    /// References the Listing whose listing fee is being paid.
    ListingFee,
}

impl LineTarget {
    pub fn family(&self) -> TargetFamily {
        match self {
            LineTarget::CaseCreate
            | LineTarget::CaseOfferRelease { .. }
            | LineTarget::CaseOfferClose { .. }
            | LineTarget::CaseInvoiceLine => TargetFamily::Case,
            LineTarget::ProductPurchase { .. } | LineTarget::TourBooking { .. } => TargetFamily::Product,
            LineTarget::ServicePurchase { .. } => TargetFamily::Service,
            LineTarget::ListingFee => TargetFamily::Listing,
        }
    }

    /// The container a line of this kind is expected to reference.
    pub fn expected_container(&self) -> Container {
        match self {
            LineTarget::TourBooking { .. } => Container::Bookings,
            LineTarget::CaseCreate
            | LineTarget::CaseOfferRelease { .. }
            | LineTarget::CaseOfferClose { .. }
            | LineTarget::CaseInvoiceLine => Container::Cases,
            LineTarget::ProductPurchase { .. } | LineTarget::ListingFee => Container::Listings,
            LineTarget::ServicePurchase { .. } => Container::Services,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LineTarget::TourBooking { .. } => "TOUR-BOOKING",
            LineTarget::CaseCreate => "CASE-CREATE",
            LineTarget::CaseOfferRelease { .. } => "CASE-OFFER-RELEASE",
            LineTarget::CaseOfferClose { .. } => "CASE-OFFER-CLOSE",
            LineTarget::CaseInvoiceLine => "CASE-INVOICE-LINE",
            LineTarget::ProductPurchase { .. } => "PRODUCT-PURCHASE",
            LineTarget::ServicePurchase { .. } => "SERVICE-PURCHASE",
            LineTarget::ListingFee => "LISTING-FEE",
        }
    }
}

/// Groups line targets for the purposes of choosing which emails to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetFamily {
    Case,
    Product,
    Service,
    Listing,
}

/// Referral attribution on a service sale. The referring merchant is owed `share_bps` of the line amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Featuring {
    pub merchant_id: MerchantId,
    pub share_bps: u32,
}

//--------------------------------------      Price log        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceKind {
    Charge,
    FullRefund,
    PartialRefund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceStatus {
    AwaitingPayment,
    AwaitingCharge,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLogEntry {
    #[serde(rename = "type")]
    pub kind: PriceKind,
    pub status: PriceStatus,
    pub price: Money,
    #[serde(default)]
    pub tax: Cents,
    /// The gateway refund this entry is waiting on. Removed once the refund has been credited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_id: Option<CreditId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    pub at: DateTime<Utc>,
}

impl PriceLogEntry {
    pub fn charge(price: Money, status: PriceStatus) -> Self {
        Self {
            kind: PriceKind::Charge,
            status,
            price,
            tax: Cents::ZERO,
            refund_id: None,
            credit_id: None,
            payment_id: None,
            at: Utc::now(),
        }
    }

    pub fn refund(kind: PriceKind, price: Money, refund_id: &str) -> Self {
        Self {
            kind,
            status: PriceStatus::AwaitingPayment,
            price,
            tax: Cents::ZERO,
            refund_id: Some(refund_id.to_string()),
            credit_id: None,
            payment_id: None,
            at: Utc::now(),
        }
    }

    pub fn with_tax(mut self, tax: Cents) -> Self {
        self.tax = tax;
        self
    }

    pub fn currency(&self) -> &Currency {
        &self.price.currency
    }
}

//--------------------------------------   Paid status log     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaidStatus {
    AwaitingPayment,
    AwaitingCharge,
    Paid,
    Void,
    Success,
    FullRefund,
    PartialRefund,
}

impl PaidStatus {
    pub fn is_unpaid(&self) -> bool {
        matches!(self, PaidStatus::AwaitingPayment | PaidStatus::AwaitingCharge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidStatusEntry {
    pub label: PaidStatus,
    pub at: DateTime<Utc>,
    /// Who or what triggered the change
    pub by: String,
}

impl PaidStatusEntry {
    pub fn new(label: PaidStatus, by: &str) -> Self {
        Self { label, at: Utc::now(), by: by.to_string() }
    }
}

//--------------------------------------       Shipment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    /// The raw rate-shopping result. Discarded once the order settles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_rates: Option<Vec<CarrierRate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_rate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_summary: Option<RateSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRate {
    pub id: String,
    pub carrier: String,
    pub service: String,
    pub amount: Cents,
    pub currency: Currency,
    #[serde(default)]
    pub estimated_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSummary {
    pub carrier: String,
    pub service: String,
    pub amount: Cents,
    pub currency: Currency,
    #[serde(default)]
    pub estimated_days: Option<u32>,
    /// How many rates were quoted
    pub quoted: usize,
}

impl Shipment {
    /// Compresses the rate list into a summary of the selected rate, or the cheapest one if none was selected.
    /// Returns `None` when there is nothing to compress.
    pub fn summarize_rates(&self) -> Option<RateSummary> {
        let rates = self.carrier_rates.as_ref()?;
        let chosen = self
            .selected_rate_id
            .as_ref()
            .and_then(|id| rates.iter().find(|r| &r.id == id))
            .or_else(|| rates.iter().min_by_key(|r| r.amount))?;
        Some(RateSummary {
            carrier: chosen.carrier.clone(),
            service: chosen.service.clone(),
            amount: chosen.amount,
            currency: chosen.currency.clone(),
            estimated_days: chosen.estimated_days,
            quoted: rates.len(),
        })
    }
}
