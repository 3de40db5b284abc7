mod domain;
mod head_log;
mod ids;
mod inventory;
mod money;
mod order;
mod payments;
mod references;

pub use domain::{
    Booking,
    Case,
    CaseOffer,
    CaseStatus,
    Customer,
    Listing,
    ListingVariant,
    Notification,
    OfferStatus,
    ProcessedEvent,
    Service,
    ServiceBooking,
    Session,
    Ticket,
    TicketStatusEntry,
    TicketType,
    Vendor,
};
pub use head_log::HeadLog;
pub use ids::{CreditId, LineId, MerchantId, OrderId, PaymentId, VariantId};
pub use inventory::{
    AdjustmentReason,
    Alert,
    AlertKind,
    AlertStatus,
    InventoryLevels,
    InventoryRecord,
    InventoryTransaction,
};
pub use money::{Currency, Money, UnitPrice};
pub use order::{
    CarrierRate,
    Featuring,
    LineTarget,
    Order,
    OrderLine,
    PaidStatus,
    PaidStatusEntry,
    PendingEffects,
    PriceKind,
    PriceLogEntry,
    PriceStatus,
    RateSummary,
    Shipment,
    TargetFamily,
};
pub use payments::{
    ApplicationFees,
    ChargeFees,
    Credit,
    CustomerFees,
    FeeBreakdown,
    GatewayFees,
    MerchantFees,
    Payment,
    PaymentMethod,
    PayoutFees,
    PayoutSummary,
    ShippingFees,
};
pub use references::{Container, DocRef, LineRef, UnknownContainer};
