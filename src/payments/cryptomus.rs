//! Cryptomus payment webhooks.
//!
//! The signature travels inside the body: `sign = md5(base64(json_without_sign) + api_key)`,
//! where the JSON is encoded the way PHP's `json_encode` does it (slashes escaped).

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use serde_json::{Map, Value};

use super::{decimal, digest_eq, json_body, missing, text, Notification, Parsed, PaymentProvider, PaymentStatus, Verification};
use crate::{PaymentProgress, Result};

pub struct Cryptomus {
    api_key: Option<String>,
}

impl Cryptomus {
    pub fn new(api_key: Option<String>) -> Self { Self { api_key } }
}

/// Computes the `sign` field for a body object (any existing `sign` is excluded).
pub fn sign(body: &Map<String, Value>, api_key: &str) -> Option<String> {
    let unsigned: Map<String, Value> = body.iter().filter(|(k, _)| k.as_str() != "sign").map(|(k, v)| (k.clone(), v.clone())).collect();
    let encoded = serde_json::to_string(&Value::Object(unsigned)).ok()?.replace('/', "\\/");
    let mut hasher = Md5::new();
    hasher.update(STANDARD.encode(encoded).as_bytes());
    hasher.update(api_key.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

fn status_for(status: &str) -> Option<PaymentStatus> {
    let mapped = match status {
        "paid" | "paid_over" => PaymentStatus::Paid,
        "check" | "process" | "confirm_check" | "wrong_amount_waiting" => {
            PaymentStatus::Pending(PaymentProgress::Confirming)
        }
        "fail" | "wrong_amount" | "system_fail" | "refund_paid" => PaymentStatus::Failed,
        "cancel" => PaymentStatus::Expired,
        _ => return None,
    };
    Some(mapped)
}

impl PaymentProvider for Cryptomus {
    fn name(&self) -> &'static str { "cryptomus" }

    fn verify(&self, raw: &[u8], _headers: &HeaderMap) -> Verification {
        let Some(api_key) = self.api_key.as_deref() else {
            return Verification::Skipped("no api key configured");
        };
        let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(raw) else { return Verification::Invalid };
        let Some(provided) = body.get("sign").and_then(Value::as_str) else { return Verification::Invalid };
        match sign(&body, api_key) {
            Some(expected) if digest_eq(&expected, provided) => Verification::Valid,
            _ => Verification::Invalid,
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event = body["status"].as_str().ok_or_else(|| missing("status"))?.to_string();
        if body["type"].as_str().is_some_and(|t| t != "payment") {
            return Ok(Parsed::Ignored { event });
        }
        let Some(status) = status_for(&event) else { return Ok(Parsed::Ignored { event }) };
        let order_ref = text(&body["order_id"]).ok_or_else(|| missing("order_id"))?;
        let amount = decimal(&body["payment_amount_usd"]).or_else(|| decimal(&body["amount"]));
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount: None, event }))
    }
}
