//! Builders for the documents and events tests need. They panic on failure.
use chrono::Utc;
use mkt_common::Cents;
use serde::Serialize;
use serde_json::json;

use crate::{
    db_types::{
        Container,
        Currency,
        Customer,
        HeadLog,
        InventoryLevels,
        InventoryRecord,
        LineId,
        LineRef,
        LineTarget,
        MerchantId,
        Money,
        Order,
        OrderId,
        OrderLine,
        PaidStatus,
        PaidStatusEntry,
        PaymentId,
        PriceLogEntry,
        PriceStatus,
        Vendor,
    },
    gateway_types::{
        BalanceTransaction,
        CaptureMetadata,
        ChargeCaptured,
        ChargeDetails,
        ChargeRefunded,
        FeeDetail,
        FeeDetailKind,
        RefundDetails,
        RefundMetadata,
        RefundStatus,
    },
    traits::{Document, DocumentStore},
};

/// A line with a single CHARGE entry awaiting charge. The reference is inherited from the order.
pub fn line(id: &str, merchant: &str, target: LineTarget, amount: i64, quantity: i64) -> OrderLine {
    let price = Money::new(Cents::from(amount), quantity, Currency::default());
    OrderLine {
        id: LineId::from(id),
        reference: LineRef::Inherit,
        target,
        merchant_id: MerchantId::from(merchant),
        provisional: false,
        price_log: HeadLog::new().with(PriceLogEntry::charge(price, PriceStatus::AwaitingCharge)),
        paid_status_log: HeadLog::new(),
    }
}

/// A line that has already been settled.
pub fn paid_line(id: &str, merchant: &str, target: LineTarget, amount: i64, quantity: i64) -> OrderLine {
    let price = Money::new(Cents::from(amount), quantity, Currency::default());
    let mut charge = PriceLogEntry::charge(price, PriceStatus::Success);
    charge.payment_id = Some(PaymentId::from("pay_fixture"));
    OrderLine {
        price_log: HeadLog::new().with(charge),
        paid_status_log: HeadLog::new().with(PaidStatusEntry::new(PaidStatus::Paid, "fixture")),
        ..line(id, merchant, target, amount, quantity)
    }
}

pub fn order(id: &str, customer_email: &str, lines: Vec<OrderLine>) -> Order {
    Order {
        id: OrderId::from(id),
        code: format!("ORD-{id}"),
        customer_email: customer_email.to_string(),
        reference: None,
        lines,
        payments: HeadLog::new(),
        credits: HeadLog::new(),
        shipments: vec![],
        ttl: None,
        effects_pending: vec![],
    }
}

pub fn vendor(id: &str, email: &str, account: Option<&str>) -> Vendor {
    Vendor {
        id: MerchantId::from(id),
        name: format!("Vendor {id}"),
        email: email.to_string(),
        stripe_account: account.map(String::from),
    }
}

pub fn customer(id: &str, email: &str, user_id: &str) -> Customer {
    Customer { id: id.to_string(), email: email.to_string(), user_id: user_id.to_string() }
}

pub async fn seed<S, T>(store: &S, container: Container, doc: &T, partition: &str) -> Document
where
    S: DocumentStore,
    T: Serialize,
{
    let body = serde_json::to_value(doc).expect("fixture does not serialize");
    store.insert(container, body, partition, "fixture").await.expect("could not seed fixture")
}

/// A tracked product variant in the `inventory` container.
pub async fn seed_inventory<S: DocumentStore>(store: &S, variant: &str, on_hand: i64, committed: i64) {
    let body = json!({
        "id": variant,
        "levels": { "qty_on_hand": on_hand, "qty_committed": committed, "track": true }
    });
    store.insert(Container::Inventory, body, variant, "fixture").await.expect("could not seed inventory");
}

pub async fn inventory_levels<S: DocumentStore>(store: &S, variant: &str) -> InventoryLevels {
    let doc = store.get_by_id(Container::Inventory, variant, variant).await.expect("store error");
    doc.expect("no such variant").parse::<InventoryRecord>().expect("bad inventory record").levels
}

/// A charge in USD whose balance transaction carries the given gateway fee and tax, plus a platform application
/// fee detail that decomposition ignores.
pub fn charge_details(id: &str, amount: i64, stripe_fee: i64, stripe_tax: i64) -> ChargeDetails {
    let detail = |kind: FeeDetailKind, amount: i64| FeeDetail {
        kind,
        amount: Cents::from(amount),
        currency: Currency::default(),
    };
    let fee = stripe_fee + stripe_tax;
    ChargeDetails {
        id: id.to_string(),
        amount: Cents::from(amount),
        currency: Currency::default(),
        payment_intent_id: Some(format!("pi_{id}")),
        payment_method: None,
        balance_transaction: Some(BalanceTransaction {
            id: format!("txn_{id}"),
            amount: Cents::from(amount),
            fee: Cents::from(fee),
            net: Cents::from(amount - fee),
            fee_details: vec![
                detail(FeeDetailKind::StripeFee, stripe_fee),
                detail(FeeDetailKind::Tax, stripe_tax),
                detail(FeeDetailKind::ApplicationFee, 99),
            ],
        }),
    }
}

pub fn captured(event_id: &str, charge_id: &str, order_id: &str, merchant: &str, tax: i64) -> ChargeCaptured {
    ChargeCaptured {
        event_id: event_id.to_string(),
        charge_id: charge_id.to_string(),
        payment_intent_id: Some(format!("pi_{charge_id}")),
        metadata: CaptureMetadata {
            order_id: OrderId::from(order_id),
            customer_email: "buyer@example.com".to_string(),
            merchant_id: MerchantId::from(merchant),
            tax_amount: Cents::from(tax),
            shipping: None,
            account: None,
        },
    }
}

pub fn refunded(event_id: &str, charge_id: &str, order_id: &str, customer_email: &str) -> ChargeRefunded {
    ChargeRefunded {
        event_id: event_id.to_string(),
        charge_id: charge_id.to_string(),
        account: None,
        metadata: RefundMetadata { order_id: OrderId::from(order_id), customer_email: customer_email.to_string() },
    }
}

pub fn refund_details(id: &str, amount: i64, status: RefundStatus) -> RefundDetails {
    RefundDetails {
        id: id.to_string(),
        amount: Cents::from(amount),
        currency: Currency::default(),
        status,
        destination: Some("card_fixture".to_string()),
        created: Utc::now(),
    }
}
