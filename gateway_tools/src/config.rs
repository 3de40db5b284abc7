use log::*;
use mkt_common::Secret;

pub const DEFAULT_GATEWAY_API_URL: &str = "https://api.stripe.com";

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Base URL of the gateway's REST API, without a trailing slash
    pub api_url: String,
    pub api_key: Secret<String>,
    /// Upper bound on the number of refunds fetched for a single charge
    pub refund_page_size: u32,
}

impl GatewayConfig {
    pub fn new_from_env_or_default() -> Self {
        let api_url = std::env::var("MKT_GATEWAY_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| {
                info!("🪛️ MKT_GATEWAY_API_URL not set, using {DEFAULT_GATEWAY_API_URL}");
                DEFAULT_GATEWAY_API_URL.to_string()
            });
        let api_key = Secret::new(std::env::var("MKT_GATEWAY_API_KEY").unwrap_or_else(|_| {
            warn!("🪛️ MKT_GATEWAY_API_KEY not set, using (probably useless) default");
            "sk_test_00000000000000".to_string()
        }));
        Self { api_url, api_key, refund_page_size: 100 }
    }
}
