//! Webhook signature checks for Actix Web.
//!
//! Every delivery carries a signature header of the form `t=<unix seconds>,v1=<hex>[,v1=<hex>…]`. Each `v1` value is
//! an HMAC-SHA256 of `"{t}.{raw body}"`, keyed with the endpoint's signing secret. A delivery is let through if any
//! `v1` signature matches and `t` is within the configured tolerance of the server clock. Other schemes (`v0`) in the
//! header are ignored.
//!
//! Wrap the webhook scope with [`HmacMiddlewareFactory`]. The body is buffered, checked, and handed back to the inner
//! service untouched.

use std::{
    future::{ready, Ready},
    rc::Rc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorBadRequest, ErrorForbidden, ErrorInternalServerError},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use hmac::Mac;
use log::{error, trace, warn};
use mkt_common::Secret;
use thiserror::Error;

use crate::helpers::signature_mac;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("The signature header is malformed. {0}")]
    Malformed(String),
    #[error("The signature header carries no v1 signature")]
    NoSignature,
    #[error("The delivery was signed {age}s away from now, beyond the {tolerance}s tolerance")]
    OutsideTolerance { age: u64, tolerance: u64 },
    #[error("No v1 signature matches the delivery")]
    Mismatch,
    #[error("The signing secret cannot be used as a key")]
    InvalidKey,
}

/// The parts of a signature header that are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = vec![];
        for item in header.split(',') {
            let (key, value) = item
                .trim()
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed(format!("'{item}' is not a key=value pair")))?;
            match key {
                "t" => {
                    let t = value.parse::<i64>().map_err(|e| SignatureError::Malformed(format!("bad timestamp. {e}")))?;
                    timestamp = Some(t);
                },
                "v1" => match hex::decode(value) {
                    Ok(sig) => signatures.push(sig),
                    Err(e) => warn!("🔐️ Ignoring a v1 signature that is not hex. {e}"),
                },
                _ => trace!("🔐️ Ignoring signature scheme {key}"),
            }
        }
        let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed("no timestamp".into()))?;
        if signatures.is_empty() {
            return Err(SignatureError::NoSignature);
        }
        Ok(Self { timestamp, signatures })
    }
}

/// Checks `header` against `body`. `now` is in seconds since the epoch.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let header = SignatureHeader::parse(header)?;
    let age = now.abs_diff(header.timestamp);
    if age > tolerance.as_secs() {
        return Err(SignatureError::OutsideTolerance { age, tolerance: tolerance.as_secs() });
    }
    let mac = signature_mac(secret, header.timestamp, body).map_err(|_| SignatureError::InvalidKey)?;
    // verify_slice compares in constant time
    if header.signatures.iter().any(|sig| mac.clone().verify_slice(sig).is_ok()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn unix_now() -> i64 {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

pub struct HmacMiddlewareFactory {
    header: String,
    key: Secret<String>,
    tolerance: Duration,
    // If false, then the middleware will not check the signature and always allow the call
    enabled: bool,
}

impl HmacMiddlewareFactory {
    pub fn new(header: &str, key: Secret<String>, tolerance: Duration, enabled: bool) -> Self {
        HmacMiddlewareFactory { header: header.into(), key, tolerance, enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService {
            header: self.header.clone(),
            key: self.key.clone(),
            tolerance: self.tolerance,
            enabled: self.enabled,
            service: Rc::new(service),
        }))
    }
}

pub struct HmacMiddlewareService<S> {
    header: String,
    key: Secret<String>,
    tolerance: Duration,
    enabled: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let secret = self.key.reveal().clone();
        let header_name = self.header.clone();
        let tolerance = self.tolerance;
        let enabled = self.enabled;
        Box::pin(async move {
            if !enabled {
                trace!("🔐️ Signature checks are disabled. Allowing request.");
                return service.call(req).await;
            }
            let header = match req.headers().get(&header_name).map(|h| h.to_str()) {
                Some(Ok(h)) => h.to_string(),
                Some(Err(_)) => return Err(ErrorForbidden("Malformed HMAC signature.")),
                None => {
                    warn!("🔐️ No {header_name} header on webhook request. Denying access.");
                    return Err(ErrorForbidden("No HMAC signature found."));
                },
            };
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract request data: {:?}", e);
                ErrorBadRequest("Failed to extract request data.")
            })?;
            match verify_signature(&secret, &header, data.as_ref(), tolerance, unix_now()) {
                Ok(()) => {
                    trace!("🔐️ Signature check for request ✅️");
                    req.set_payload(bytes_to_payload(data));
                    service.call(req).await
                },
                Err(e @ (SignatureError::Malformed(_) | SignatureError::NoSignature)) => {
                    warn!("🔐️ {e}. Denying access.");
                    Err(ErrorForbidden("Malformed HMAC signature."))
                },
                Err(e @ SignatureError::OutsideTolerance { .. }) => {
                    warn!("🔐️ {e}. Denying access.");
                    Err(ErrorForbidden("HMAC signature has expired."))
                },
                Err(SignatureError::Mismatch) => {
                    warn!("🔐️ Invalid signature found in webhook request. Denying access.");
                    Err(ErrorForbidden("Invalid HMAC signature."))
                },
                Err(e @ SignatureError::InvalidKey) => {
                    error!("🔐️ Could not verify the webhook signature. {e}");
                    Err(ErrorInternalServerError("Could not verify signature."))
                },
            }
        })
    }
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::{sign_payload, signature_header};

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_726_099_200;
    const TOLERANCE: Duration = Duration::from_secs(300);

    #[test]
    fn parses_every_v1_and_skips_other_schemes() {
        let h = SignatureHeader::parse("t=1726099200, v1=00ff,v0=abcd,v1=zz,v1=10").unwrap();
        assert_eq!(h.timestamp, NOW);
        assert_eq!(h.signatures, vec![vec![0x00, 0xff], vec![0x10]]);
        assert!(matches!(SignatureHeader::parse("v1=00ff"), Err(SignatureError::Malformed(_))));
        assert!(matches!(SignatureHeader::parse("t=soon,v1=00ff"), Err(SignatureError::Malformed(_))));
        assert!(matches!(SignatureHeader::parse("t=1,v0=00ff"), Err(SignatureError::NoSignature)));
        assert!(matches!(SignatureHeader::parse("garbage"), Err(SignatureError::Malformed(_))));
    }

    #[test]
    fn accepts_any_matching_signature_within_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, NOW, body).unwrap();
        assert_eq!(verify_signature(SECRET, &header, body, TOLERANCE, NOW), Ok(()));
        assert_eq!(verify_signature(SECRET, &header, body, TOLERANCE, NOW + 300), Ok(()));
        assert_eq!(verify_signature(SECRET, &header, body, TOLERANCE, NOW - 300), Ok(()));

        // During secret rotation the gateway signs with both secrets
        let old = sign_payload("whsec_old", NOW, body).unwrap();
        let rotated = format!("t={NOW},v1={old},v1={}", sign_payload(SECRET, NOW, body).unwrap());
        assert_eq!(verify_signature(SECRET, &rotated, body, TOLERANCE, NOW), Ok(()));
    }

    #[test]
    fn rejects_stale_tampered_and_replayed_deliveries() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, NOW, body).unwrap();
        let stale = verify_signature(SECRET, &header, body, TOLERANCE, NOW + 301);
        assert_eq!(stale, Err(SignatureError::OutsideTolerance { age: 301, tolerance: 300 }));
        let tampered = verify_signature(SECRET, &header, br#"{"id":"evt_2"}"#, TOLERANCE, NOW);
        assert_eq!(tampered, Err(SignatureError::Mismatch));
        // Moving the timestamp forward without re-signing breaks the signature
        let sig = sign_payload(SECRET, NOW, body).unwrap();
        let replayed = format!("t={},v1={sig}", NOW + 60);
        assert_eq!(verify_signature(SECRET, &replayed, body, TOLERANCE, NOW + 60), Err(SignatureError::Mismatch));
        assert_eq!(verify_signature("whsec_other", &header, body, TOLERANCE, NOW), Err(SignatureError::Mismatch));
    }
}
