use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::{json, Value};
use settlement_engine::{
    db_types::{Container, DocRef, LineId, LineRef, LineTarget, PaidStatus, VariantId},
    test_utils::fixtures::*,
};

use super::helpers::{sign, sign_at, unix_now, TestSystem};

async fn seed_marketplace(system: &TestSystem) {
    seed(&system.store, Container::Vendors, &vendor("M1", "m1@example.com", Some("acct_m1")), "M1").await;
    seed(&system.store, Container::Customers, &customer("C1", "buyer@example.com", "U1"), "C1").await;
    seed_inventory(&system.store, "V1", 10, 2).await;
    let target = LineTarget::ProductPurchase { variant_id: Some(VariantId::from("V1")) };
    let mut l = line("L1", "M1", target, 5000, 2);
    l.reference = LineRef::Concrete(DocRef::new(Container::Listings, "listing-V1", "M1"));
    seed(&system.store, Container::Orders, &order("O1", "buyer@example.com", vec![l]), "O1").await;
    system.gateway.add_charge(charge_details("ch_1", 5400, 180, 0));
}

fn capture_webhook(event_id: &str, order_id: &str) -> String {
    json!({
        "id": event_id,
        "type": "charge.captured",
        "created": 1_726_099_200,
        "data": { "object": {
            "id": "ch_1",
            "amount": 5400,
            "currency": "usd",
            "captured": true,
            "payment_intent": "pi_1",
            "metadata": {
                "order_id": order_id,
                "customer_email": "buyer@example.com",
                "merchant_id": "M1",
                "tax_amount": "0"
            }
        }}
    })
    .to_string()
}

fn json_body(body: &str) -> Value {
    serde_json::from_str(body).expect("Response is not JSON")
}

#[actix_web::test]
async fn health_check() {
    let system = TestSystem::new().await;
    let (status, body) = system.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn unsigned_webhooks_are_forbidden() {
    let system = TestSystem::new().await;
    let body = capture_webhook("evt_1", "O1");
    let (status, message) = system.post_webhook(&body, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message, "No HMAC signature found.");
}

#[actix_web::test]
async fn tampered_webhooks_are_forbidden() {
    let system = TestSystem::new().await;
    let signature = sign(&capture_webhook("evt_1", "O1"));
    let (status, message) = system.post_webhook(&capture_webhook("evt_1", "O2"), Some(&signature)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message, "Invalid HMAC signature.");
}

#[actix_web::test]
async fn stale_signatures_are_forbidden() {
    let system = TestSystem::new().await;
    seed_marketplace(&system).await;
    let body = capture_webhook("evt_1", "O1");
    let signature = sign_at(&body, unix_now() - 3600);
    let (status, message) = system.post_webhook(&body, Some(&signature)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message, "HMAC signature has expired.");
    let order = system.order("O1").await;
    assert!(order.payments.is_empty());
}

#[actix_web::test]
async fn signatures_without_a_timestamp_are_forbidden() {
    let system = TestSystem::new().await;
    let body = capture_webhook("evt_1", "O1");
    let signature = sign(&body);
    let bare = signature.split(',').filter(|part| !part.starts_with("t=")).collect::<Vec<_>>().join(",");
    let (status, message) = system.post_webhook(&body, Some(&bare)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message, "Malformed HMAC signature.");
    let (status, message) = system.post_webhook(&body, Some("t=1726099200")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message, "Malformed HMAC signature.");
}

#[actix_web::test]
async fn signature_checks_can_be_disabled() {
    let mut system = TestSystem::new().await;
    system.hmac_checks = false;
    let body = json!({"id": "evt_9", "type": "payout.paid", "data": {"object": {}}}).to_string();
    let (status, _) = system.post_webhook(&body, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn unhandled_events_are_acknowledged() {
    let system = TestSystem::new().await;
    let body = json!({"id": "evt_9", "type": "payout.paid", "data": {"object": {"id": "po_1"}}}).to_string();
    let (status, body) = system.post_signed_webhook(&body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["success"], true);
}

#[actix_web::test]
async fn malformed_metadata_is_acknowledged_as_a_failure() {
    let system = TestSystem::new().await;
    let mut hook: Value = serde_json::from_str(&capture_webhook("evt_1", "O1")).unwrap();
    hook["data"]["object"]["metadata"]["tax_amount"] = json!("four dollars");
    let (status, body) = system.post_signed_webhook(&hook.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("tax_amount"));
}

#[actix_web::test]
async fn captures_settle_orders() {
    let system = TestSystem::new().await;
    seed_marketplace(&system).await;
    let (status, body) = system.post_signed_webhook(&capture_webhook("evt_1", "O1")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["success"], true);

    let order = system.order("O1").await;
    assert_eq!(order.payments.len(), 1);
    assert_eq!(order.payments.current().unwrap().charge_id, "ch_1");
    let l1 = order.line(&LineId::from("L1")).unwrap();
    assert_eq!(l1.current_paid_status(), Some(PaidStatus::Paid));
    let levels = inventory_levels(&system.store, "V1").await;
    assert_eq!((levels.qty_on_hand, levels.qty_committed), (8, 0));
    assert!(!system.notifier.published().is_empty());
}

#[actix_web::test]
async fn redelivered_captures_are_duplicates() {
    let system = TestSystem::new().await;
    seed_marketplace(&system).await;
    let body = capture_webhook("evt_1", "O1");
    let (status, _) = system.post_signed_webhook(&body).await;
    assert_eq!(status, StatusCode::OK);
    let (status, response) = system.post_signed_webhook(&body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&response)["message"], "Event evt_1 was already processed.");
    assert_eq!(system.order("O1").await.payments.len(), 1);
}

#[actix_web::test]
async fn engine_failures_ask_for_redelivery() {
    let system = TestSystem::new().await;
    seed_marketplace(&system).await;
    let (status, body) = system.post_signed_webhook(&capture_webhook("evt_1", "O404")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error = json_body(&body)["error"].as_str().unwrap().to_string();
    assert!(error.contains("O404"), "{error}");
}
