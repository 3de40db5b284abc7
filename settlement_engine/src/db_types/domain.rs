//! The documents settlement reads and touches besides the Order itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DocRef, HeadLog, InventoryLevels, LineId, MerchantId, OrderId, PaidStatus, UnitPrice, VariantId};

//--------------------------------------        Booking        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub listing: DocRef,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl Booking {
    pub fn ticket(&self, session_id: &str, ticket_id: &str) -> Option<&Ticket> {
        self.sessions.iter().find(|s| s.id == session_id)?.tickets.iter().find(|t| t.id == ticket_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    /// The ticket type on the listing
    pub variant_id: VariantId,
    #[serde(default)]
    pub status_log: HeadLog<TicketStatusEntry>,
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

impl Ticket {
    pub fn is_paid(&self) -> bool {
        self.status_log.current().map(|s| s.label == PaidStatus::Paid).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatusEntry {
    pub label: PaidStatus,
    pub at: DateTime<Utc>,
}

//--------------------------------------      Cases          -----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    AwaitingPayment,
    New,
    Active,
    ActiveReleased,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub status: CaseStatus,
    pub contact_email: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
}

/// An offer on a case. Partitioned by case id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOffer {
    pub id: String,
    pub case_id: String,
    pub status: OfferStatus,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

//--------------------------------------  Listings & services  ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub merchant_id: MerchantId,
    #[serde(default)]
    pub price: Option<UnitPrice>,
    #[serde(default)]
    pub setup_intent_secret: Option<String>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub variants: Vec<ListingVariant>,
    #[serde(default)]
    pub ticket_types: Vec<TicketType>,
}

impl Listing {
    pub fn ticket_type(&self, id: &VariantId) -> Option<&TicketType> {
        self.ticket_types.iter().find(|t| &t.id == id)
    }

    pub fn variant(&self, id: &VariantId) -> Option<&ListingVariant> {
        self.variants.iter().find(|v| &v.id == id)
    }
}

/// A purchasable variant of a product listing. Its stock lives in the `inventory` container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingVariant {
    pub id: VariantId,
    pub price: UnitPrice,
}

/// A ticket type of a tour listing. Ticket stock lives inside the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    pub id: VariantId,
    #[serde(default)]
    pub name: String,
    pub price: UnitPrice,
    #[serde(default)]
    pub inventory: InventoryLevels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub merchant_id: MerchantId,
    pub price: UnitPrice,
}

/// Created once per settled service line. The id is `<order id>:<line id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBooking {
    pub id: String,
    pub service: DocRef,
    pub order_id: OrderId,
    pub line_id: LineId,
    pub merchant_id: MerchantId,
    pub customer_email: String,
    pub created_at: DateTime<Utc>,
}

impl ServiceBooking {
    pub fn id_for(order: &OrderId, line: &LineId) -> String {
        format!("{order}:{line}")
    }
}

//--------------------------------------        Parties        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: MerchantId,
    pub name: String,
    pub email: String,
    /// The connected gateway account payouts go to.
    #[serde(default)]
    pub stripe_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub user_id: String,
}

//--------------------------------------     Bookkeeping       ---------------------------------------------------------
/// A persisted copy of a published notification, so that clients that were offline can catch up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub topic: String,
    pub recipient: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// A gateway event that has been fully handled. The id is the gateway's event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: String,
    pub kind: String,
    pub order_id: OrderId,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn finds_tickets_by_session() {
        let booking: Booking = serde_json::from_value(json!({
            "id": "B1",
            "listing": { "id": "tour-1", "partition": "M1", "container": "listings" },
            "sessions": [
                { "id": "s1", "tickets": [{ "id": "t1", "variant_id": "adult" }] },
                { "id": "s2", "tickets": [{ "id": "t1", "variant_id": "child" }] }
            ]
        }))
        .unwrap();
        assert_eq!(booking.ticket("s2", "t1").map(|t| t.variant_id.as_str()), Some("child"));
        assert!(booking.ticket("s3", "t1").is_none());
        assert!(!booking.ticket("s1", "t1").unwrap().is_paid());
    }
}
