use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------       Container       ---------------------------------------------------------
/// The document collections the engine reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Orders,
    Bookings,
    Listings,
    Services,
    Cases,
    CaseOffers,
    Vendors,
    Customers,
    Inventory,
    InventoryTransactions,
    Alerts,
    ServiceBookings,
    Notifications,
    ProcessedEvents,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Orders => "orders",
            Container::Bookings => "bookings",
            Container::Listings => "listings",
            Container::Services => "services",
            Container::Cases => "cases",
            Container::CaseOffers => "case_offers",
            Container::Vendors => "vendors",
            Container::Customers => "customers",
            Container::Inventory => "inventory",
            Container::InventoryTransactions => "inventory_transactions",
            Container::Alerts => "alerts",
            Container::ServiceBookings => "service_bookings",
            Container::Notifications => "notifications",
            Container::ProcessedEvents => "processed_events",
        }
    }
}

impl Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown container: {0}")]
pub struct UnknownContainer(String);

impl FromStr for Container {
    type Err = UnknownContainer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = match s {
            "orders" => Container::Orders,
            "bookings" => Container::Bookings,
            "listings" => Container::Listings,
            "services" => Container::Services,
            "cases" => Container::Cases,
            "case_offers" => Container::CaseOffers,
            "vendors" => Container::Vendors,
            "customers" => Container::Customers,
            "inventory" => Container::Inventory,
            "inventory_transactions" => Container::InventoryTransactions,
            "alerts" => Container::Alerts,
            "service_bookings" => Container::ServiceBookings,
            "notifications" => Container::Notifications,
            "processed_events" => Container::ProcessedEvents,
            s => return Err(UnknownContainer(s.to_string())),
        };
        Ok(c)
    }
}

//--------------------------------------        DocRef         ---------------------------------------------------------
/// A pointer to a document in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocRef {
    pub id: String,
    pub partition: String,
    pub container: Container,
}

impl DocRef {
    pub fn new<S1: Into<String>, S2: Into<String>>(container: Container, id: S1, partition: S2) -> Self {
        Self { id: id.into(), partition: partition.into(), container }
    }

    /// A reference to a document that is its own partition.
    pub fn own_partition<S: Into<String>>(container: Container, id: S) -> Self {
        let id = id.into();
        Self { partition: id.clone(), id, container }
    }
}

impl Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.container, self.id, self.partition)
    }
}

//--------------------------------------        LineRef        ---------------------------------------------------------
/// The domain object an order line pays for.
///
/// `Inherit` means "whatever the order itself references". It is resolved once per load with [`LineRef::resolve`]
/// and is never compared against a magic value at use sites.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineRef {
    #[default]
    Inherit,
    Concrete(DocRef),
}

impl LineRef {
    pub fn resolve(&self, order_ref: Option<&DocRef>) -> Option<DocRef> {
        match self {
            LineRef::Inherit => order_ref.cloned(),
            LineRef::Concrete(r) => Some(r.clone()),
        }
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self, LineRef::Inherit)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inherit_resolves_to_order_reference() {
        let case = DocRef::own_partition(Container::Cases, "case-1");
        assert_eq!(LineRef::Inherit.resolve(Some(&case)), Some(case.clone()));
        assert_eq!(LineRef::Inherit.resolve(None), None);
        let listing = DocRef::new(Container::Listings, "l-1", "m-1");
        assert_eq!(LineRef::Concrete(listing.clone()).resolve(Some(&case)), Some(listing));
    }

    #[test]
    fn line_ref_wire_format() {
        assert_eq!(serde_json::to_string(&LineRef::Inherit).unwrap(), r#""inherit""#);
        let r = LineRef::Concrete(DocRef::own_partition(Container::Cases, "c"));
        assert_eq!(
            serde_json::to_string(&r).unwrap(),
            r#"{"concrete":{"id":"c","partition":"c","container":"cases"}}"#
        );
        for c in [Container::CaseOffers, Container::InventoryTransactions, Container::ProcessedEvents] {
            assert_eq!(c.as_str().parse::<Container>().unwrap(), c);
        }
    }
}
