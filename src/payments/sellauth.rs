//! SellAuth invoice webhooks. Charges are whole-unit like LemonSqueezy's.

use axum::http::HeaderMap;

use super::{
    check_hmac, decimal, header, json_body, text, HmacAlgorithm, Notification, Parsed, PaymentProvider, PaymentStatus,
    Verification,
};
use crate::{Money, PaymentProgress, Result, StorefrontError};

pub const SIGNATURE_HEADER: &str = "x-signature";

pub struct SellAuth {
    webhook_secret: Option<String>,
}

impl SellAuth {
    pub fn new(webhook_secret: Option<String>) -> Self { Self { webhook_secret } }
}

fn status_for(event: Option<&str>, status: Option<&str>) -> Option<PaymentStatus> {
    let status = status.map(str::to_ascii_lowercase);
    match (event, status.as_deref()) {
        (Some("INVOICE.PAID"), _) | (_, Some("completed")) => Some(PaymentStatus::Paid),
        (Some("INVOICE.CANCELLED"), _) | (_, Some("expired")) => Some(PaymentStatus::Expired),
        (_, Some("pending")) => Some(PaymentStatus::Pending(PaymentProgress::AwaitingPayment)),
        (_, Some("failed")) => Some(PaymentStatus::Failed),
        _ => None,
    }
}

impl PaymentProvider for SellAuth {
    fn name(&self) -> &'static str { "sellauth" }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        check_hmac(HmacAlgorithm::Sha256, self.webhook_secret.as_deref(), raw, header(headers, SIGNATURE_HEADER))
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event_name = body["event"].as_str();
        let status_field = body["status"].as_str();
        let event = event_name.or(status_field).unwrap_or_default().to_string();
        if event.is_empty() {
            return Err(StorefrontError::MalformedPayload("missing event or status".into()));
        }
        let Some(status) = status_for(event_name, status_field) else { return Ok(Parsed::Ignored { event }) };
        let order_ref = text(&body["custom_fields"]["order_id"])
            .or_else(|| text(&body["order_id"]))
            .ok_or_else(|| StorefrontError::MalformedPayload("missing custom_fields.order_id".into()))?;
        let amount = decimal(&body["price"]).or_else(|| decimal(&body["total_price"]));
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount: None, event }))
    }

    fn charge_amount(&self, total: Money) -> Money {
        total.ceil_whole()
    }
}
