use chrono::{DateTime, Utc};

use crate::GatewayApiError;

/// The gateway reports times as unix timestamps in seconds.
pub fn from_unix_timestamp(ts: i64) -> Result<DateTime<Utc>, GatewayApiError> {
    DateTime::from_timestamp(ts, 0).ok_or(GatewayApiError::InvalidTimestamp(ts))
}

/// Gateway currency codes are lower case. Everything else in the marketplace uses upper case.
pub fn gateway_currency(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamps() {
        let t = from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(t.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert!(matches!(from_unix_timestamp(i64::MAX), Err(GatewayApiError::InvalidTimestamp(_))));
    }

    #[test]
    fn currencies() {
        assert_eq!(gateway_currency(" USD"), "usd");
    }
}
