use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The envelope of every webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayWebhook {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Set for events that happened on a connected account
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}
