use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification could not be delivered: {0}")]
    DeliveryFailed(String),
    #[error("Unknown email template: {0}")]
    UnknownTemplate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyAction {
    Upsert,
    Delete,
}

/// Who receives a published notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "id")]
pub enum Audience {
    /// Everyone subscribed to a group channel, e.g. a customer's email channel.
    Group(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    pub action: NotifyAction,
    pub audience: Audience,
}

impl PublishOptions {
    pub fn upsert_to_group(group: &str) -> Self {
        Self { action: NotifyAction::Upsert, audience: Audience::Group(group.to_string()) }
    }

    pub fn upsert_to_user(user: &str) -> Self {
        Self { action: NotifyAction::Upsert, audience: Audience::User(user.to_string()) }
    }
}

/// Real-time notifications and transactional email. Callers treat every call as best-effort.
#[allow(async_fn_in_trait)]
pub trait Notifier: Clone {
    async fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> Result<(), NotifyError>;

    async fn send_templated_email(&self, template: &str, recipient: &str, variables: Value)
        -> Result<(), NotifyError>;
}
