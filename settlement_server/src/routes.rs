//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Database and gateway calls are all expressed as futures, so
//! handlers never block a worker while they wait.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use settlement_engine::{
    traits::{DocumentStore, Notifier, PaymentGateway},
    RefundApi,
    SettlementApi,
};

use crate::{
    data_objects::{GatewayWebhook, JsonResponse},
    errors::ServerError,
    integrations::{gateway_event_from_webhook, GatewayEvent},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Gateway  ----------------------------------------------------
route!(gateway_webhook => Post "/gateway" impl DocumentStore, PaymentGateway, Notifier);
/// Route handler for gateway webhook deliveries.
///
/// Captures are settled against their order and refunds are reconciled. Every other event type is acknowledged and
/// ignored.
///
/// * Events that cannot be converted are acknowledged with a failure message, since redelivering them would not
///   help.
/// * Engine failures return a 500 so that the gateway redelivers the event. Redelivery is safe: processed events are
///   recorded, and a replay returns a receipt marked `duplicate`.
pub async fn gateway_webhook<S, G, N>(
    req: HttpRequest,
    body: web::Json<GatewayWebhook>,
    settlements: web::Data<SettlementApi<S, G, N>>,
    refunds: web::Data<RefundApi<S, G, N>>,
) -> Result<HttpResponse, ServerError>
where
    S: DocumentStore,
    G: PaymentGateway,
    N: Notifier,
{
    let hook = body.into_inner();
    trace!("💻️ Received {} webhook {} at {}", hook.event_type, hook.id, req.uri());
    let event_id = hook.id.clone();
    let event = match gateway_event_from_webhook(hook) {
        Ok(event) => event,
        Err(e) => {
            warn!("💻️ Could not convert gateway event {event_id}. {e}");
            return Ok(HttpResponse::Ok().json(JsonResponse::failure(e)));
        },
    };
    let result = match event {
        GatewayEvent::Ignored { event_id, reason } => {
            debug!("💻️ Ignoring gateway event {event_id}. {reason}");
            JsonResponse::success(reason)
        },
        GatewayEvent::Captured(capture) => {
            let receipt = settlements.settle_capture(&capture).await.map_err(|e| {
                error!("💻️ Could not settle capture {} for order {}. {e}", capture.event_id, capture.metadata.order_id);
                ServerError::from(e)
            })?;
            if receipt.duplicate {
                JsonResponse::success(format!("Event {event_id} was already processed."))
            } else {
                info!("💻️ Order {} settled. {} line(s) paid", receipt.order_id, receipt.lines.len());
                JsonResponse::success(format!("Order {} settled.", receipt.order_id))
            }
        },
        GatewayEvent::Refunded(refund) => {
            let receipt = refunds.process_refund(&refund).await.map_err(|e| {
                error!("💻️ Could not process refund {} for order {}. {e}", refund.event_id, refund.metadata.order_id);
                ServerError::from(e)
            })?;
            if receipt.duplicate {
                JsonResponse::success(format!("Event {event_id} was already processed."))
            } else {
                info!("💻️ {} refund(s) credited to order {}", receipt.credited.len(), receipt.order_id);
                JsonResponse::success(format!("{} refund(s) credited.", receipt.credited.len()))
            }
        },
    };
    Ok(HttpResponse::Ok().json(result))
}
