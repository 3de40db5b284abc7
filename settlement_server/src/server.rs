use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use gateway_tools::StripeApi;
use log::*;
use mkt_common::Cents;
use settlement_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    RefundApi,
    SettlementApi,
    SqliteDocumentStore,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::{ServerNotifier, StripeGateway},
    middleware::HmacMiddlewareFactory,
    routes::{health, GatewayWebhookRoute},
};

const EVENT_BUFFER_SIZE: usize = 64;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let store = SqliteDocumentStore::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    store.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let api = StripeApi::new(config.gateway.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = StripeGateway::new(api);
    let notifier = ServerNotifier::from_config(config.notify_url.as_deref());
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, create_event_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let srv = create_server_instance(config, store, gateway, notifier, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    store: SqliteDocumentStore,
    gateway: StripeGateway,
    notifier: ServerNotifier,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let engine = config.engine.clone();
        let settlements = SettlementApi::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            engine.clone(),
            producers.clone(),
        );
        let refunds = RefundApi::new(store.clone(), gateway.clone(), notifier.clone(), engine, producers.clone());
        let webhook = &config.webhook;
        let hmac = HmacMiddlewareFactory::new(
            &webhook.hmac_header,
            webhook.hmac_secret.clone(),
            webhook.signature_tolerance,
            webhook.hmac_checks,
        );
        let webhook_scope = web::scope("/webhook")
            .wrap(hmac)
            .service(GatewayWebhookRoute::<SqliteDocumentStore, StripeGateway, ServerNotifier>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("mkt::access_log"))
            .app_data(web::Data::new(settlements))
            .app_data(web::Data::new(refunds))
            .service(health)
            .service(webhook_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Hooks that log settled payments, fully settled orders and processed refunds.
pub fn create_event_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_settled(|ev| {
            Box::pin(async move {
                let charge = ev.payment.as_ref().map(|p| p.charge_id.as_str()).unwrap_or("no charge");
                info!("📬️ Payment settled on order {} for {} ({charge})", ev.order_id, ev.merchant_id);
            })
        })
        .on_order_settled(|ev| {
            Box::pin(async move {
                info!("📬️ Order {} is fully settled", ev.order.id);
            })
        })
        .on_refund_processed(|ev| {
            Box::pin(async move {
                let total = ev.credits.iter().map(|c| c.amount).sum::<Cents>();
                let count = ev.credits.len();
                info!("📬️ {count} refund(s) of {total} credited to order {} ({})", ev.order_id, ev.charge_id);
            })
        });
    hooks
}
