//! Turns webhook deliveries into the engine's inbound events.
//!
//! The gateway sends metadata values as strings, so amounts arrive as `"400"` and are parsed into cents here.
use gateway_tools::StripeCharge;
use log::*;
use mkt_common::Cents;
use serde_json::Value;
use settlement_engine::{
    db_types::{Currency, MerchantId, OrderId},
    gateway_types::{CaptureMetadata, ChargeCaptured, ChargeRefunded, RefundMetadata, ShippingMetadata},
};

use crate::{data_objects::GatewayWebhook, errors::EventConversionError};

pub const CHARGE_CAPTURED: &str = "charge.captured";
pub const CHARGE_SUCCEEDED: &str = "charge.succeeded";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Captured(ChargeCaptured),
    Refunded(ChargeRefunded),
    /// Acknowledged, but nothing to do
    Ignored { event_id: String, reason: String },
}

pub fn gateway_event_from_webhook(hook: GatewayWebhook) -> Result<GatewayEvent, EventConversionError> {
    let ignore = |reason: &str| GatewayEvent::Ignored { event_id: hook.id.clone(), reason: reason.to_string() };
    let handled = [CHARGE_CAPTURED, CHARGE_SUCCEEDED, CHARGE_REFUNDED];
    if !handled.contains(&hook.event_type.as_str()) {
        return Ok(ignore(&format!("{} events are not handled", hook.event_type)));
    }
    let charge = charge_object(&hook.data.object)?;
    let event = match hook.event_type.as_str() {
        CHARGE_REFUNDED => GatewayEvent::Refunded(refunded_event(&hook, &charge)?),
        CHARGE_SUCCEEDED if !charge.captured => ignore("the charge has not been captured"),
        _ => GatewayEvent::Captured(captured_event(&hook, &charge)?),
    };
    Ok(event)
}

fn charge_object(object: &Value) -> Result<StripeCharge, EventConversionError> {
    if object.is_null() {
        return Err(EventConversionError::MissingObject);
    }
    serde_json::from_value(object.clone())
        .map_err(|e| EventConversionError::InvalidMetadata { field: "data.object", reason: e.to_string() })
}

fn captured_event(hook: &GatewayWebhook, charge: &StripeCharge) -> Result<ChargeCaptured, EventConversionError> {
    let meta = &charge.metadata;
    let shipping = match cents_field(meta, "shipping_subtotal")? {
        Some(subtotal) => Some(ShippingMetadata {
            subtotal,
            tax: cents_field(meta, "shipping_tax")?.unwrap_or_default(),
            fee: cents_field(meta, "shipping_fee")?.unwrap_or_default(),
            currency: text_field(meta, "shipping_currency").map(|c| Currency::new(&c)),
        }),
        None => None,
    };
    let metadata = CaptureMetadata {
        order_id: OrderId::from(required_text(meta, "order_id")?),
        customer_email: required_text(meta, "customer_email")?,
        merchant_id: MerchantId::from(required_text(meta, "merchant_id")?),
        tax_amount: cents_field(meta, "tax_amount")?.unwrap_or_default(),
        shipping,
        account: hook.account.clone().or_else(|| text_field(meta, "account")),
    };
    debug!("📬️ Charge {} captured for order {} ({})", charge.id, metadata.order_id, hook.id);
    Ok(ChargeCaptured {
        event_id: hook.id.clone(),
        charge_id: charge.id.clone(),
        payment_intent_id: charge.payment_intent.clone(),
        metadata,
    })
}

fn refunded_event(hook: &GatewayWebhook, charge: &StripeCharge) -> Result<ChargeRefunded, EventConversionError> {
    let meta = &charge.metadata;
    let metadata = RefundMetadata {
        order_id: OrderId::from(required_text(meta, "order_id")?),
        customer_email: required_text(meta, "customer_email")?,
    };
    debug!("📬️ Charge {} refunded for order {} ({})", charge.id, metadata.order_id, hook.id);
    Ok(ChargeRefunded {
        event_id: hook.id.clone(),
        charge_id: charge.id.clone(),
        account: hook.account.clone().or_else(|| text_field(meta, "account")),
        metadata,
    })
}

fn text_field(meta: &Value, field: &str) -> Option<String> {
    meta.get(field).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

fn required_text(meta: &Value, field: &'static str) -> Result<String, EventConversionError> {
    text_field(meta, field).ok_or(EventConversionError::MissingField(field))
}

/// Amounts may be strings or bare numbers. An empty string counts as absent.
fn cents_field(meta: &Value, field: &'static str) -> Result<Option<Cents>, EventConversionError> {
    let invalid = |reason: String| EventConversionError::InvalidMetadata { field, reason };
    match meta.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(|v| Some(Cents::from(v))).ok_or_else(|| invalid(n.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Cents::try_from(s.as_str()).map(Some).map_err(|e| invalid(e.to_string())),
        Some(other) => Err(invalid(format!("expected an amount, found {other}"))),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::data_objects::WebhookData;

    fn webhook(event_type: &str, object: Value) -> GatewayWebhook {
        GatewayWebhook {
            id: "evt_1".into(),
            event_type: event_type.into(),
            account: None,
            created: 1_726_099_200,
            data: WebhookData { object },
        }
    }

    fn charge(captured: bool, metadata: Value) -> Value {
        json!({
            "id": "ch_1",
            "amount": 5400,
            "currency": "usd",
            "captured": captured,
            "payment_intent": "pi_1",
            "metadata": metadata
        })
    }

    fn capture_metadata() -> Value {
        json!({
            "order_id": "O1",
            "customer_email": "buyer@example.com",
            "merchant_id": "M1",
            "tax_amount": "400",
            "shipping_subtotal": "1200",
            "shipping_tax": "96",
            "shipping_currency": "usd"
        })
    }

    #[test]
    fn captured_charges() {
        let event = gateway_event_from_webhook(webhook(CHARGE_CAPTURED, charge(true, capture_metadata()))).unwrap();
        let GatewayEvent::Captured(c) = event else { panic!("expected a capture, got {event:?}") };
        assert_eq!(c.event_id, "evt_1");
        assert_eq!(c.charge_id, "ch_1");
        assert_eq!(c.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(c.metadata.order_id, OrderId::from("O1"));
        assert_eq!(c.metadata.tax_amount, Cents::from(400));
        let shipping = c.metadata.shipping.unwrap();
        assert_eq!(shipping.subtotal, Cents::from(1200));
        assert_eq!((shipping.tax, shipping.fee), (Cents::from(96), Cents::ZERO));
        assert_eq!(shipping.currency, Some(Currency::new("USD")));
    }

    #[test]
    fn succeeded_charges_count_once_captured() {
        let hook = webhook(CHARGE_SUCCEEDED, charge(true, capture_metadata()));
        assert!(matches!(gateway_event_from_webhook(hook), Ok(GatewayEvent::Captured(_))));
        let hook = webhook(CHARGE_SUCCEEDED, charge(false, capture_metadata()));
        assert!(matches!(gateway_event_from_webhook(hook), Ok(GatewayEvent::Ignored { .. })));
    }

    #[test]
    fn refunded_charges() {
        let mut hook = webhook(CHARGE_REFUNDED, charge(true, json!({"order_id": "O1", "customer_email": "b@x.com"})));
        hook.account = Some("acct_m1".into());
        let event = gateway_event_from_webhook(hook).unwrap();
        let GatewayEvent::Refunded(r) = event else { panic!("expected a refund, got {event:?}") };
        assert_eq!(r.account.as_deref(), Some("acct_m1"));
        assert_eq!(r.metadata.customer_email, "b@x.com");
    }

    #[test]
    fn other_events_are_ignored() {
        let event = gateway_event_from_webhook(webhook("payout.paid", Value::Null)).unwrap();
        assert!(matches!(event, GatewayEvent::Ignored { .. }));
    }

    #[test]
    fn malformed_metadata() {
        let mut meta = capture_metadata();
        meta["tax_amount"] = json!("4.00");
        let err = gateway_event_from_webhook(webhook(CHARGE_CAPTURED, charge(true, meta))).unwrap_err();
        assert!(matches!(err, EventConversionError::InvalidMetadata { field: "tax_amount", .. }));

        let mut meta = capture_metadata();
        meta.as_object_mut().unwrap().remove("merchant_id");
        let err = gateway_event_from_webhook(webhook(CHARGE_CAPTURED, charge(true, meta))).unwrap_err();
        assert!(matches!(err, EventConversionError::MissingField("merchant_id")));

        let err = gateway_event_from_webhook(webhook(CHARGE_REFUNDED, Value::Null)).unwrap_err();
        assert!(matches!(err, EventConversionError::MissingObject));
    }
}
