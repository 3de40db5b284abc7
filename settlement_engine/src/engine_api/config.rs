use std::time::Duration;

use log::*;
use mkt_common::helpers::parse_env_var;

use crate::fees::FeeSchedule;

const DEFAULT_VOID_INVOICE_GRACE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_PATCH_RETRIES: usize = 5;
const DEFAULT_PAYMENT_CODE_ATTEMPTS: usize = 8;
const DEFAULT_FOLLOW_UP_LEASE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fees: FeeSchedule,
    /// The ttl given to unpaid invoices that are voided because a sibling invoice on the same case was paid.
    pub void_invoice_grace_ttl: Duration,
    /// How many times a patch is recomputed after losing an optimistic-concurrency race.
    pub patch_retries: usize,
    /// How many friendly codes to draw before falling back to the record id.
    pub payment_code_attempts: usize,
    /// How long a delivery holds an event's follow-up before a redelivery may take it over.
    pub follow_up_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            void_invoice_grace_ttl: DEFAULT_VOID_INVOICE_GRACE_TTL,
            patch_retries: DEFAULT_PATCH_RETRIES,
            payment_code_attempts: DEFAULT_PAYMENT_CODE_ATTEMPTS,
            follow_up_lease: DEFAULT_FOLLOW_UP_LEASE,
        }
    }
}

fn env_or_default<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Err(_) => {
            info!("🪛️ {name} is not set. Using the default, {default}.");
            default
        },
        Ok(_) => parse_env_var(name).unwrap_or_else(|| {
            error!("🪛️ {name} is not a valid value. Using the default, {default}, instead.");
            default
        }),
    }
}

impl EngineConfig {
    pub fn from_env_or_default() -> Self {
        let defaults = FeeSchedule::default();
        let fees = FeeSchedule {
            customer_bps: env_or_default("MKT_CUSTOMER_FEE_BPS", defaults.customer_bps),
            merchant_bps: env_or_default("MKT_MERCHANT_FEE_BPS", defaults.merchant_bps),
            merchant_fee_tax_bps: env_or_default("MKT_MERCHANT_FEE_TAX_BPS", defaults.merchant_fee_tax_bps),
        };
        let ttl = env_or_default("MKT_VOID_INVOICE_GRACE_TTL", DEFAULT_VOID_INVOICE_GRACE_TTL.as_secs());
        let patch_retries = env_or_default("MKT_PATCH_RETRIES", DEFAULT_PATCH_RETRIES);
        let payment_code_attempts = env_or_default("MKT_PAYMENT_CODE_ATTEMPTS", DEFAULT_PAYMENT_CODE_ATTEMPTS);
        let lease = env_or_default("MKT_FOLLOW_UP_LEASE", DEFAULT_FOLLOW_UP_LEASE.as_secs());
        Self {
            fees,
            void_invoice_grace_ttl: Duration::from_secs(ttl),
            patch_retries,
            payment_code_attempts,
            follow_up_lease: Duration::from_secs(lease),
        }
    }
}
