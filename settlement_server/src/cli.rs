use std::{env, fmt::Write as _};

use mkt_common::Secret;

use crate::config::ServerConfig;

const README: &str = include_str!("./cli-help.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Serve,
    Help,
    ShowConfig,
}

impl Command {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let mut args = args.into_iter();
        match args.next().as_deref() {
            None => Command::Serve,
            Some("--config" | "config") if args.next().is_none() => Command::ShowConfig,
            Some(_) => Command::Help,
        }
    }
}

/// Returns true if the arguments were handled and the server should not start.
pub fn handle_command_line_args() -> bool {
    match Command::from_args(env::args().skip(1)) {
        Command::Serve => false,
        Command::Help => {
            println!("\n{README}\n");
            true
        },
        Command::ShowConfig => {
            let config = ServerConfig::from_env_or_default();
            println!("{}", describe(&config));
            true
        },
    }
}

fn secret_state(secret: &Secret<String>) -> &'static str {
    if secret.is_empty() {
        "not set"
    } else {
        "set"
    }
}

/// The effective configuration, one setting per line, with secrets reduced to whether they are set.
pub fn describe(config: &ServerConfig) -> String {
    let webhook = &config.webhook;
    let engine = &config.engine;
    let rows: Vec<(&str, String)> = vec![
        ("MKT_HOST", config.host.clone()),
        ("MKT_PORT", config.port.to_string()),
        ("MKT_DATABASE_URL", config.database_url.clone()),
        ("MKT_WEBHOOK_HMAC_SECRET", secret_state(&webhook.hmac_secret).into()),
        ("MKT_WEBHOOK_HMAC_CHECKS", webhook.hmac_checks.to_string()),
        ("MKT_WEBHOOK_HMAC_HEADER", webhook.hmac_header.clone()),
        ("MKT_WEBHOOK_SIGNATURE_TOLERANCE", format!("{}s", webhook.signature_tolerance.as_secs())),
        ("MKT_GATEWAY_API_URL", config.gateway.api_url.clone()),
        ("MKT_GATEWAY_API_KEY", secret_state(&config.gateway.api_key).into()),
        ("MKT_NOTIFY_URL", config.notify_url.clone().unwrap_or_else(|| "not set (notifications are logged)".into())),
        ("MKT_CUSTOMER_FEE_BPS", engine.fees.customer_bps.to_string()),
        ("MKT_MERCHANT_FEE_BPS", engine.fees.merchant_bps.to_string()),
        ("MKT_MERCHANT_FEE_TAX_BPS", engine.fees.merchant_fee_tax_bps.to_string()),
        ("MKT_VOID_INVOICE_GRACE_TTL", format!("{}s", engine.void_invoice_grace_ttl.as_secs())),
        ("MKT_PATCH_RETRIES", engine.patch_retries.to_string()),
        ("MKT_PAYMENT_CODE_ATTEMPTS", engine.payment_code_attempts.to_string()),
        ("MKT_FOLLOW_UP_LEASE", format!("{}s", engine.follow_up_lease.as_secs())),
    ];
    let mut out = String::from("Effective configuration:\n");
    for (name, value) in rows {
        let _ = writeln!(out, "  {name:<35} {value}");
    }
    if !webhook.hmac_checks {
        out.push_str("\n🚨️ Webhook signatures are NOT checked.\n");
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_a_command() {
        assert_eq!(Command::from_args(args(&[])), Command::Serve);
        assert_eq!(Command::from_args(args(&["--config"])), Command::ShowConfig);
        assert_eq!(Command::from_args(args(&["config"])), Command::ShowConfig);
        assert_eq!(Command::from_args(args(&["--help"])), Command::Help);
        assert_eq!(Command::from_args(args(&["-h"])), Command::Help);
        assert_eq!(Command::from_args(args(&["--config", "extra"])), Command::Help);
        assert_eq!(Command::from_args(args(&["--port", "80"])), Command::Help);
    }

    #[test]
    fn describes_the_config_without_revealing_secrets() {
        let mut config = ServerConfig::new("0.0.0.0", 9000);
        config.webhook.hmac_secret = Secret::new("whsec_do_not_print".to_string());
        let text = describe(&config);
        assert!(!text.contains("whsec_do_not_print"));
        assert!(text.lines().any(|l| l.contains("MKT_WEBHOOK_HMAC_SECRET") && l.ends_with(" set")));
        assert!(text.lines().any(|l| l.contains("MKT_GATEWAY_API_KEY") && l.ends_with("not set")));
        assert!(text.lines().any(|l| l.contains("MKT_PORT") && l.ends_with("9000")));
        assert!(text.lines().any(|l| l.contains("MKT_WEBHOOK_HMAC_HEADER") && l.ends_with("Stripe-Signature")));
        assert!(text.lines().any(|l| l.contains("MKT_WEBHOOK_SIGNATURE_TOLERANCE") && l.ends_with("300s")));
        assert!(text.lines().any(|l| l.contains("MKT_FOLLOW_UP_LEASE") && l.ends_with("60s")));
        assert!(!text.contains("NOT checked"));

        config.webhook.hmac_checks = false;
        assert!(describe(&config).contains("Webhook signatures are NOT checked"));
    }
}
