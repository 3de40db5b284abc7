use cucumber::{given, then, when};
use mkt_common::Cents;
use serde_json::json;
use settlement_engine::{
    db_types::{
        Case,
        CaseOffer,
        CaseStatus,
        Container,
        Currency,
        DocRef,
        LineId,
        LineRef,
        LineTarget,
        MerchantId,
        Money,
        OfferStatus,
        Order,
        OrderId,
        PaidStatus,
        PriceKind,
        PriceLogEntry,
        VariantId,
    },
    gateway_types::RefundStatus,
    patch::{DocPath, PatchOp},
    test_utils::fixtures::*,
    traits::{Audience, DocumentStore},
};

use crate::cucumber::MarketplaceWorld;

async fn stored_order(world: &MarketplaceWorld, order_id: &str) -> Order {
    let doc = world.store().get_by_id(Container::Orders, order_id, order_id).await.expect("Error fetching order");
    doc.expect("Order does not exist").parse::<Order>().expect("Order is malformed")
}

/// Parses a SCREAMING_SNAKE_CASE label the way it is stored.
fn label<T: serde::de::DeserializeOwned>(s: &str) -> T {
    serde_json::from_value(json!(s)).unwrap_or_else(|_| panic!("{s} is not a valid label"))
}

//--------------------------------------       Fixtures        ---------------------------------------------------------
#[given(expr = "vendor {word} with payout account {word}")]
async fn given_vendor(world: &mut MarketplaceWorld, id: String, account: String) {
    let v = vendor(&id, &format!("{id}@example.com"), Some(&account));
    seed(world.store(), Container::Vendors, &v, &id).await;
}

#[given(expr = "customer {word} with email {word} and user {word}")]
async fn given_customer(world: &mut MarketplaceWorld, id: String, email: String, user: String) {
    seed(world.store(), Container::Customers, &customer(&id, &email, &user), &id).await;
}

#[given(expr = "variant {word} with {int} on hand and {int} committed")]
async fn given_inventory(world: &mut MarketplaceWorld, variant: String, on_hand: i64, committed: i64) {
    seed_inventory(world.store(), &variant, on_hand, committed).await;
}

#[given(expr = "order {word} for {word} with line {word} from {word} for {int} cents x {int} of variant {word}")]
async fn given_product_order(
    world: &mut MarketplaceWorld,
    order_id: String,
    email: String,
    line_id: String,
    merchant: String,
    amount: i64,
    quantity: i64,
    variant: String,
) {
    let target = LineTarget::ProductPurchase { variant_id: Some(VariantId::from(variant.as_str())) };
    let mut l = line(&line_id, &merchant, target, amount, quantity);
    l.reference = LineRef::Concrete(DocRef::new(Container::Listings, format!("listing-{variant}"), merchant));
    seed(world.store(), Container::Orders, &order(&order_id, &email, vec![l]), &order_id).await;
}

#[given(expr = "case {word} awaiting payment with offer {word} from contact {word}")]
async fn given_case(world: &mut MarketplaceWorld, case_id: String, offer_id: String, email: String) {
    let case = Case {
        id: case_id.clone(),
        status: CaseStatus::AwaitingPayment,
        contact_email: email,
        payment_intent: Some("pi_pending".to_string()),
    };
    seed(world.store(), Container::Cases, &case, &case_id).await;
    let offer = CaseOffer {
        id: offer_id,
        case_id: case_id.clone(),
        status: OfferStatus::Pending,
        paid: false,
        payment_intent: Some("pi_pending".to_string()),
    };
    seed(world.store(), Container::CaseOffers, &offer, &case_id).await;
}

#[given(expr = "order {word} for case {word} with a free release of offer {word} from {word}")]
async fn given_free_release(world: &mut MarketplaceWorld, order_id: String, case_id: String, offer: String, m: String) {
    let target = LineTarget::CaseOfferRelease { offer_id: offer };
    let mut o = order(&order_id, "buyer@example.com", vec![line("R1", &m, target, 0, 1)]);
    o.reference = Some(DocRef::own_partition(Container::Cases, case_id));
    seed(world.store(), Container::Orders, &o, &order_id).await;
}

#[given(expr = "the gateway holds charge {word} of {int} cents with a {int} cent fee")]
async fn given_charge(world: &mut MarketplaceWorld, charge_id: String, amount: i64, fee: i64) {
    world.system().gateway.add_charge(charge_details(&charge_id, amount, fee, 0));
}

#[given(expr = "the gateway holds a succeeded refund {word} of {int} cents on charge {word}")]
async fn given_refund(world: &mut MarketplaceWorld, refund_id: String, amount: i64, charge_id: String) {
    world.system().gateway.add_refund(&charge_id, refund_details(&refund_id, amount, RefundStatus::Succeeded));
}

#[given(expr = "a full refund {word} of {int} cents with {int} tax is requested for line {word} of order {word}")]
async fn request_full_refund(
    world: &mut MarketplaceWorld,
    refund_id: String,
    amount: i64,
    tax: i64,
    line_id: String,
    order_id: String,
) {
    let order = stored_order(world, &order_id).await;
    let line = order.line(&LineId::from(line_id.as_str())).expect("No such line");
    let (_, charge) = line.latest_charge().expect("Line was never charged");
    let price = Money::new(Cents::from(-amount), -charge.price.quantity, Currency::default());
    let entry = PriceLogEntry::refund(PriceKind::FullRefund, price, &refund_id).with_tax(Cents::from(-tax));
    let path = DocPath::root().key("lines").id(&line_id).key("price_log");
    let op = PatchOp::prepend(path, serde_json::to_value(entry).expect("entry does not serialize"));
    world
        .store()
        .apply_ordered_patch(Container::Orders, &order_id, &order_id, &[op], "refund-request", None)
        .await
        .expect("Could not request refund");
}

//--------------------------------------       Gateway         ---------------------------------------------------------
#[when(expr = "the gateway captures charge {word} on order {word} for merchant {word} as event {word} with {int} tax")]
async fn report_capture(
    world: &mut MarketplaceWorld,
    charge: String,
    order: String,
    merchant: String,
    event: String,
    tax: i64,
) {
    let sys = world.system();
    let receipt = sys.settlements.settle_capture(&captured(&event, &charge, &order, &merchant, tax)).await;
    sys.last_settlement = Some(receipt.expect("Error settling capture"));
}

#[when(expr = "the gateway reports charge {word} on order {word} refunded as event {word}")]
async fn report_refund(world: &mut MarketplaceWorld, charge_id: String, order_id: String, event_id: String) {
    let sys = world.system();
    let event = refunded(&event_id, &charge_id, &order_id, "buyer@example.com");
    let receipt = sys.refunds.process_refund(&event).await.expect("Error processing refund");
    sys.last_refund = Some(receipt);
}

#[when(expr = "order {word} is settled without a charge for merchant {word}")]
async fn settle_free(world: &mut MarketplaceWorld, order_id: String, merchant: String) {
    let sys = world.system();
    let receipt = sys
        .settlements
        .settle_without_charge(&OrderId::from(order_id.as_str()), &MerchantId::from(merchant.as_str()))
        .await
        .expect("Error settling order");
    sys.last_settlement = Some(receipt);
}

//--------------------------------------       Outcomes        ---------------------------------------------------------
#[then(expr = "line {word} of order {word} is {word}")]
async fn check_line_status(world: &mut MarketplaceWorld, line_id: String, order_id: String, status: String) {
    let order = stored_order(world, &order_id).await;
    let line = order.line(&LineId::from(line_id.as_str())).expect("No such line");
    assert_eq!(line.current_paid_status(), Some(label::<PaidStatus>(&status)));
}

#[then(expr = "order {word} has {int} payment(s)")]
async fn check_payment_count(world: &mut MarketplaceWorld, order_id: String, count: usize) {
    assert_eq!(stored_order(world, &order_id).await.payments.len(), count);
}

#[then(expr = "order {word} has {int} credit(s)")]
async fn check_credit_count(world: &mut MarketplaceWorld, order_id: String, count: usize) {
    assert_eq!(stored_order(world, &order_id).await.credits.len(), count);
}

#[then(expr = "the payment on order {word} is for charge {word} with {int} tax")]
async fn check_payment(world: &mut MarketplaceWorld, order_id: String, charge_id: String, tax: i64) {
    let order = stored_order(world, &order_id).await;
    let payment = order.payments.current().expect("No payment recorded");
    assert_eq!(payment.charge_id, charge_id);
    assert_eq!(payment.fees.charge.tax, Cents::from(tax));
    assert_eq!(payment.fees.charge.components_total(), payment.fees.charge.paid);
}

#[then(expr = "order {word} has a credit of {int} cents for refund {word}")]
async fn check_credit(world: &mut MarketplaceWorld, order_id: String, amount: i64, refund_id: String) {
    let order = stored_order(world, &order_id).await;
    let credit = order.credits.iter().find(|c| c.refund_id == refund_id).expect("No credit for refund");
    assert_eq!(credit.amount, Cents::from(amount));
}

#[then(expr = "variant {word} has {int} on hand and {int} committed")]
async fn check_inventory(world: &mut MarketplaceWorld, variant: String, on_hand: i64, committed: i64) {
    let levels = inventory_levels(world.store(), &variant).await;
    assert_eq!((levels.qty_on_hand, levels.qty_committed), (on_hand, committed));
}

#[then(expr = "a {word} notification was published")]
async fn check_published(world: &mut MarketplaceWorld, topic: String) {
    assert!(world.system().notifier.topics().contains(&topic), "Nothing was published on {topic}");
}

#[then(expr = "a {word} notification was published to user {word}")]
async fn check_published_to_user(world: &mut MarketplaceWorld, topic: String, user: String) {
    let published = world.system().notifier.published();
    let found = published.iter().any(|p| p.topic == topic && p.options.audience == Audience::User(user.clone()));
    assert!(found, "No {topic} notification for user {user}");
}

#[then(expr = "a {word} notification was published to group {word}")]
async fn check_published_to_group(world: &mut MarketplaceWorld, topic: String, group: String) {
    let published = world.system().notifier.published();
    let found = published.iter().any(|p| p.topic == topic && p.options.audience == Audience::Group(group.clone()));
    assert!(found, "No {topic} notification for group {group}");
}

#[then("the last settlement was a duplicate")]
async fn check_duplicate_settlement(world: &mut MarketplaceWorld) {
    let receipt = world.system().last_settlement.as_ref().expect("Nothing was settled");
    assert!(receipt.duplicate);
}

#[then("the last refund was a duplicate")]
async fn check_duplicate_refund(world: &mut MarketplaceWorld) {
    let receipt = world.system().last_refund.as_ref().expect("No refund was processed");
    assert!(receipt.duplicate);
}

#[then(expr = "case {word} is {word}")]
async fn check_case(world: &mut MarketplaceWorld, case_id: String, status: String) {
    let doc = world.store().get_by_id(Container::Cases, &case_id, &case_id).await.expect("Error fetching case");
    let case = doc.expect("Case does not exist").parse::<Case>().expect("Case is malformed");
    assert_eq!(case.status, label::<CaseStatus>(&status));
    assert_eq!(case.payment_intent, None);
}

#[then(expr = "offer {word} on case {word} is {word}")]
async fn check_offer(world: &mut MarketplaceWorld, offer_id: String, case_id: String, status: String) {
    let doc = world.store().get_by_id(Container::CaseOffers, &offer_id, &case_id).await.expect("Error fetching offer");
    let offer = doc.expect("Offer does not exist").parse::<CaseOffer>().expect("Offer is malformed");
    assert_eq!(offer.status, label::<OfferStatus>(&status));
    assert!(offer.paid);
}
