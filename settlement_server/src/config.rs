use std::{env, time::Duration};

use gateway_tools::GatewayConfig;
use log::*;
use mkt_common::{
    helpers::{parse_boolean_flag, parse_env_var},
    Secret,
};
use settlement_engine::EngineConfig;

const DEFAULT_MKT_HOST: &str = "127.0.0.1";
const DEFAULT_MKT_PORT: u16 = 8460;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/marketplace.db";
pub const DEFAULT_HMAC_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_SIGNATURE_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub webhook: WebhookConfig,
    pub gateway: GatewayConfig,
    /// Where notifications are relayed to. When unset, notifications are only logged.
    pub notify_url: Option<String>,
    pub engine: EngineConfig,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub hmac_secret: Secret<String>,
    /// If false, webhook signatures are not checked. **DANGER**
    pub hmac_checks: bool,
    pub hmac_header: String,
    /// Deliveries signed further than this from the server clock are refused.
    pub signature_tolerance: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            hmac_secret: Secret::default(),
            hmac_checks: true,
            hmac_header: DEFAULT_HMAC_HEADER.to_string(),
            signature_tolerance: DEFAULT_SIGNATURE_TOLERANCE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MKT_HOST.to_string(),
            port: DEFAULT_MKT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            webhook: WebhookConfig::default(),
            gateway: GatewayConfig::default(),
            notify_url: None,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("MKT_HOST").ok().unwrap_or_else(|| DEFAULT_MKT_HOST.into());
        let port = env::var("MKT_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for MKT_PORT. {e} Using the default, {DEFAULT_MKT_PORT}, instead."
                    );
                    DEFAULT_MKT_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_MKT_PORT);
        let database_url = env::var("MKT_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ MKT_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let notify_url = env::var("MKT_NOTIFY_URL").ok().filter(|s| !s.trim().is_empty());
        if notify_url.is_none() {
            info!("🪛️ MKT_NOTIFY_URL is not set. Notifications will be logged, not delivered.");
        }
        Self {
            host,
            port,
            database_url,
            webhook: WebhookConfig::from_env_or_default(),
            gateway: GatewayConfig::new_from_env_or_default(),
            notify_url,
            engine: EngineConfig::from_env_or_default(),
        }
    }
}

impl WebhookConfig {
    pub fn from_env_or_default() -> Self {
        let hmac_secret = env::var("MKT_WEBHOOK_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!(
                "🪛️ MKT_WEBHOOK_HMAC_SECRET is not set. Please set it to the signing secret of the gateway's webhook \
                 endpoint."
            );
            String::default()
        });
        let hmac_checks = parse_boolean_flag(env::var("MKT_WEBHOOK_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are disabled. Anyone can post gateway events to this server.");
        }
        let hmac_header = env::var("MKT_WEBHOOK_HMAC_HEADER").ok().unwrap_or_else(|| {
            debug!("🪛️ MKT_WEBHOOK_HMAC_HEADER is not set. Using {DEFAULT_HMAC_HEADER}.");
            DEFAULT_HMAC_HEADER.to_string()
        });
        let signature_tolerance = match env::var("MKT_WEBHOOK_SIGNATURE_TOLERANCE") {
            Err(_) => DEFAULT_SIGNATURE_TOLERANCE,
            Ok(s) => match parse_env_var::<u64>("MKT_WEBHOOK_SIGNATURE_TOLERANCE") {
                Some(secs) => Duration::from_secs(secs),
                None => {
                    error!("🪛️ {s} is not a number of seconds for MKT_WEBHOOK_SIGNATURE_TOLERANCE. Using the default.");
                    DEFAULT_SIGNATURE_TOLERANCE
                },
            },
        };
        Self { hmac_secret: Secret::new(hmac_secret), hmac_checks, hmac_header, signature_tolerance }
    }
}
