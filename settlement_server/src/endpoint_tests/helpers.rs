use std::time::{SystemTime, UNIX_EPOCH};

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use log::debug;
use mkt_common::Secret;
use settlement_engine::{
    db_types::{Container, Order},
    events::EventProducers,
    test_utils::{
        fakes::{FakeGateway, RecordingNotifier},
        prepare_env::prepare_test_store,
    },
    traits::DocumentStore,
    EngineConfig,
    RefundApi,
    SettlementApi,
    SqliteDocumentStore,
};

use crate::{
    config::{DEFAULT_HMAC_HEADER, DEFAULT_SIGNATURE_TOLERANCE},
    helpers::signature_header,
    middleware::HmacMiddlewareFactory,
    routes::{health, GatewayWebhookRoute},
};

// Test signing secret. DO NOT re-use it anywhere.
pub const WEBHOOK_SECRET: &str = "whsec_endpoint_tests";

pub struct TestSystem {
    pub store: SqliteDocumentStore,
    pub gateway: FakeGateway,
    pub notifier: RecordingNotifier,
    pub hmac_checks: bool,
}

impl TestSystem {
    pub async fn new() -> Self {
        let store = prepare_test_store().await;
        Self { store, gateway: FakeGateway::default(), notifier: RecordingNotifier::default(), hmac_checks: true }
    }

    pub async fn order(&self, id: &str) -> Order {
        let doc = self.store.get_by_id(Container::Orders, id, id).await.expect("Error fetching order");
        doc.expect("Order does not exist").parse::<Order>().expect("Order is malformed")
    }

    /// Sends a request through an app wired the way the server wires it, with the fakes in place of the gateway and
    /// the notifier. Errors raised by middleware come back as their status and message.
    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let settlements = SettlementApi::new(
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            EngineConfig::default(),
            EventProducers::default(),
        );
        let refunds = RefundApi::new(
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            EngineConfig::default(),
            EventProducers::default(),
        );
        let secret = Secret::new(WEBHOOK_SECRET.to_string());
        let tolerance = DEFAULT_SIGNATURE_TOLERANCE;
        let hmac = HmacMiddlewareFactory::new(DEFAULT_HMAC_HEADER, secret, tolerance, self.hmac_checks);
        let webhooks = web::scope("/webhook")
            .wrap(hmac)
            .service(GatewayWebhookRoute::<SqliteDocumentStore, FakeGateway, RecordingNotifier>::new());
        let app = App::new()
            .app_data(web::Data::new(settlements))
            .app_data(web::Data::new(refunds))
            .service(health)
            .service(webhooks);
        let service = test::init_service(app).await;
        debug!("🚀️ Making request");
        match test::try_call_service(&service, req.to_request()).await {
            Ok(res) => {
                let (_, res) = res.into_parts();
                let status = res.status();
                let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
                (status, body)
            },
            Err(e) => (e.as_response_error().status_code(), e.to_string()),
        }
    }

    pub async fn post_webhook(&self, body: &str, signature: Option<&str>) -> (StatusCode, String) {
        let mut req = TestRequest::post()
            .uri("/webhook/gateway")
            .insert_header(("Content-Type", "application/json"))
            .set_payload(body.to_string());
        if let Some(sig) = signature {
            req = req.insert_header((DEFAULT_HMAC_HEADER, sig));
        }
        self.send(req).await
    }

    pub async fn post_signed_webhook(&self, body: &str) -> (StatusCode, String) {
        let signature = sign(body);
        self.post_webhook(body, Some(&signature)).await
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("Clock is before 1970").as_secs() as i64
}

/// A signature header for `body`, signed now.
pub fn sign(body: &str) -> String {
    sign_at(body, unix_now())
}

pub fn sign_at(body: &str, timestamp: i64) -> String {
    signature_header(WEBHOOK_SECRET, timestamp, body.as_bytes()).expect("HMAC accepts keys of any length")
}
