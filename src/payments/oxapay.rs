//! OxaPay merchant callbacks, signed with HMAC-SHA512 of the raw body in the `hmac` header.

use axum::http::HeaderMap;

use super::{
    check_hmac, decimal, header, json_body, missing, text, HmacAlgorithm, Notification, Parsed, PaymentProvider,
    PaymentStatus, Verification,
};
use crate::{PaymentProgress, Result};

pub const SIGNATURE_HEADER: &str = "hmac";

pub struct OxaPay {
    merchant_key: Option<String>,
}

impl OxaPay {
    pub fn new(merchant_key: Option<String>) -> Self { Self { merchant_key } }
}

fn status_for(status: &str) -> Option<PaymentStatus> {
    let mapped = match status.to_ascii_lowercase().as_str() {
        "paid" => PaymentStatus::Paid,
        "waiting" => PaymentStatus::Pending(PaymentProgress::AwaitingPayment),
        "confirming" => PaymentStatus::Pending(PaymentProgress::Confirming),
        "failed" => PaymentStatus::Failed,
        "expired" => PaymentStatus::Expired,
        _ => return None,
    };
    Some(mapped)
}

impl PaymentProvider for OxaPay {
    fn name(&self) -> &'static str { "oxapay" }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        check_hmac(HmacAlgorithm::Sha512, self.merchant_key.as_deref(), raw, header(headers, SIGNATURE_HEADER))
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event = body["status"].as_str().ok_or_else(|| missing("status"))?.to_string();
        let Some(status) = status_for(&event) else { return Ok(Parsed::Ignored { event }) };
        let order_ref = text(&body["orderId"]).or_else(|| text(&body["order_id"])).ok_or_else(|| missing("orderId"))?;
        let amount = decimal(&body["amount"]);
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount: None, event }))
    }
}
