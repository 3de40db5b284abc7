//! Notification delivery for the server.
//!
//! When `MKT_NOTIFY_URL` is set, notifications are relayed to the real-time/email service at that address:
//! * `POST {url}/publish` with `{ topic, payload, options }`
//! * `POST {url}/email` with `{ template, recipient, variables }`
//!
//! Otherwise they are written to the log.
use std::sync::Arc;

use log::*;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use settlement_engine::traits::{Notifier, NotifyError, PublishOptions};

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    payload: Value,
    options: PublishOptions,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    template: &'a str,
    recipient: &'a str,
    variables: Value,
}

#[derive(Clone)]
pub struct RelayNotifier {
    base_url: String,
    client: Arc<Client>,
}

impl RelayNotifier {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), client: Arc::new(Client::new()) }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), NotifyError> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::DeliveryFailed(format!("{url}: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::DeliveryFailed(format!("{url} responded with {}", response.status())))
        }
    }
}

impl Notifier for RelayNotifier {
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Result<(), NotifyError> {
        trace!("📬️ Relaying {topic} to {:?}", options.audience);
        self.post("/publish", &PublishRequest { topic, payload, options }).await
    }

    async fn send_templated_email(&self, template: &str, recipient: &str, variables: Value) -> Result<(), NotifyError> {
        trace!("📬️ Relaying {template} email to {recipient}");
        self.post("/email", &EmailRequest { template, recipient, variables }).await
    }
}

#[derive(Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Result<(), NotifyError> {
        info!("📬️ {topic} ({:?} to {:?}): {payload}", options.action, options.audience);
        Ok(())
    }

    async fn send_templated_email(&self, template: &str, recipient: &str, variables: Value) -> Result<(), NotifyError> {
        info!("📬️ Email {template} to {recipient}: {variables}");
        Ok(())
    }
}

/// The notifier the server runs with, chosen from the configuration.
#[derive(Clone)]
pub enum ServerNotifier {
    Relay(RelayNotifier),
    Log(LogNotifier),
}

impl ServerNotifier {
    pub fn from_config(notify_url: Option<&str>) -> Self {
        match notify_url {
            Some(url) => {
                info!("📬️ Notifications will be relayed to {url}");
                Self::Relay(RelayNotifier::new(url))
            },
            None => Self::Log(LogNotifier),
        }
    }
}

impl Notifier for ServerNotifier {
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Result<(), NotifyError> {
        match self {
            Self::Relay(n) => n.publish(topic, payload, options).await,
            Self::Log(n) => n.publish(topic, payload, options).await,
        }
    }

    async fn send_templated_email(&self, template: &str, recipient: &str, variables: Value) -> Result<(), NotifyError> {
        match self {
            Self::Relay(n) => n.send_templated_email(template, recipient, variables).await,
            Self::Log(n) => n.send_templated_email(template, recipient, variables).await,
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn relay_urls() {
        let relay = RelayNotifier::new("http://localhost:9000/");
        assert_eq!(relay.url("/publish"), "http://localhost:9000/publish");
    }

    #[test]
    fn notifier_selection() {
        assert!(matches!(ServerNotifier::from_config(None), ServerNotifier::Log(_)));
        assert!(matches!(ServerNotifier::from_config(Some("http://n")), ServerNotifier::Relay(_)));
    }

    #[test]
    fn publish_body() {
        let body = PublishRequest {
            topic: "refund-succeeded",
            payload: json!({"orderId": "O1"}),
            options: PublishOptions::upsert_to_user("U1"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["audience"], json!({"type": "user", "id": "U1"}));
        assert_eq!(json["options"]["action"], "upsert");
    }

    #[tokio::test]
    async fn unreachable_relays_fail_delivery() {
        let relay = RelayNotifier::new("http://127.0.0.1:1");
        let err = relay.publish("t", json!({}), PublishOptions::upsert_to_group("g")).await.unwrap_err();
        assert!(matches!(err, NotifyError::DeliveryFailed(_)));
    }
}
