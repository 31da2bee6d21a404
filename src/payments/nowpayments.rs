//! NOWPayments IPN callbacks.
//!
//! The signature is an HMAC-SHA512 over the body re-serialised with its keys
//! sorted, so whitespace and key order in transit do not matter.

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use super::{
    check_hmac, decimal, header, json_body, missing, text, HmacAlgorithm, Notification, Parsed, PaymentProvider,
    PaymentStatus, Verification,
};
use crate::{PaymentProgress, Result};

pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

pub struct NowPayments {
    ipn_secret: Option<String>,
}

impl NowPayments {
    pub fn new(ipn_secret: Option<String>) -> Self { Self { ipn_secret } }
}

/// Recursively orders object keys.
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sorted(&map[key.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

pub fn canonical_body(raw: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    serde_json::to_string(&sorted(&value)).ok()
}

fn status_for(payment_status: &str) -> Option<PaymentStatus> {
    let status = match payment_status {
        "finished" => PaymentStatus::Paid,
        "waiting" => PaymentStatus::Pending(PaymentProgress::AwaitingPayment),
        "confirming" | "confirmed" | "sending" | "partially_paid" => PaymentStatus::Pending(PaymentProgress::Confirming),
        "failed" | "refunded" => PaymentStatus::Failed,
        "expired" => PaymentStatus::Expired,
        _ => return None,
    };
    Some(status)
}

impl PaymentProvider for NowPayments {
    fn name(&self) -> &'static str { "nowpayments" }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        let Some(canonical) = canonical_body(raw) else {
            return match self.ipn_secret {
                Some(_) => Verification::Invalid,
                None => Verification::Skipped("no signing secret configured"),
            };
        };
        check_hmac(HmacAlgorithm::Sha512, self.ipn_secret.as_deref(), canonical.as_bytes(), header(headers, SIGNATURE_HEADER))
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event = body["payment_status"].as_str().ok_or_else(|| missing("payment_status"))?.to_string();
        let Some(status) = status_for(&event) else { return Ok(Parsed::Ignored { event }) };
        let order_ref = text(&body["order_id"]).ok_or_else(|| missing("order_id"))?;
        let amount = decimal(&body["actually_paid_at_fiat"]).or_else(|| decimal(&body["price_amount"]));
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount: None, event }))
    }
}
