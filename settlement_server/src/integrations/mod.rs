pub mod gateway_events;
pub mod notifier;
pub mod stripe_gateway;

pub use gateway_events::{gateway_event_from_webhook, GatewayEvent};
pub use notifier::{LogNotifier, RelayNotifier, ServerNotifier};
pub use stripe_gateway::StripeGateway;
