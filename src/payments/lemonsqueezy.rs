//! LemonSqueezy store webhooks.
//!
//! Checkouts are created for whole-unit prices, so the charged total can
//! exceed the order total; the true price rides along in `meta.custom_data`.

use axum::http::HeaderMap;
use rust_decimal::Decimal;

use super::{
    check_hmac, decimal, header, json_body, missing, text, HmacAlgorithm, Notification, Parsed, PaymentProvider,
    PaymentStatus, Verification,
};
use crate::{Money, PaymentProgress, Result};

pub const SIGNATURE_HEADER: &str = "x-signature";

pub struct LemonSqueezy {
    signing_secret: Option<String>,
}

impl LemonSqueezy {
    pub fn new(signing_secret: Option<String>) -> Self { Self { signing_secret } }
}

impl PaymentProvider for LemonSqueezy {
    fn name(&self) -> &'static str { "lemonsqueezy" }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        check_hmac(HmacAlgorithm::Sha256, self.signing_secret.as_deref(), raw, header(headers, SIGNATURE_HEADER))
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event = body["meta"]["event_name"].as_str().ok_or_else(|| missing("meta.event_name"))?.to_string();
        if event != "order_created" {
            return Ok(Parsed::Ignored { event });
        }
        let attributes = &body["data"]["attributes"];
        let status = match attributes["status"].as_str() {
            Some("paid") => PaymentStatus::Paid,
            Some("pending") => PaymentStatus::Pending(PaymentProgress::Confirming),
            Some("failed") => PaymentStatus::Failed,
            _ => return Ok(Parsed::Ignored { event }),
        };
        let custom = &body["meta"]["custom_data"];
        let order_ref = text(&custom["order_id"]).ok_or_else(|| missing("meta.custom_data.order_id"))?;
        // Totals are reported in cents.
        let amount = decimal(&attributes["total"]).map(|cents| cents / Decimal::ONE_HUNDRED);
        let original_amount = decimal(&custom["original_amount"]);
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount, event }))
    }

    fn charge_amount(&self, total: Money) -> Money {
        total.ceil_whole()
    }
}
