use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;

/// The keyed MAC over a delivery: HMAC-SHA256 of `"{timestamp}.{body}"`.
pub fn signature_mac(secret: &str, timestamp: i64, body: &[u8]) -> Result<Hmac<Sha256>, InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// The hex-encoded `v1` signature the gateway sends for `body`, signed at `timestamp` (seconds since the epoch).
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, InvalidLength> {
    Ok(hex::encode(signature_mac(secret, timestamp, body)?.finalize().into_bytes()))
}

/// The full signature header value for a single `v1` signature.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, InvalidLength> {
    Ok(format!("t={timestamp},v1={}", sign_payload(secret, timestamp, body)?))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signs_timestamp_and_body() {
        // HMAC-SHA256("Jefe", "1700000000.what do ya want for nothing?")
        let expected = {
            let mut mac = Hmac::<Sha256>::new_from_slice(b"Jefe").unwrap();
            mac.update(b"1700000000.what do ya want for nothing?");
            hex::encode(mac.finalize().into_bytes())
        };
        let sig = sign_payload("Jefe", 1_700_000_000, b"what do ya want for nothing?").unwrap();
        assert_eq!(sig, expected);
        assert_eq!(sig.len(), 64);
        assert_ne!(sig, sign_payload("Jefe", 1_700_000_001, b"what do ya want for nothing?").unwrap());
        let header = signature_header("Jefe", 1_700_000_000, b"what do ya want for nothing?").unwrap();
        assert_eq!(header, format!("t=1700000000,v1={expected}"));
    }
}
