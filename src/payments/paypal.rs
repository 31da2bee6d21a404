//! PayPal webhooks. PayPal signs with a certificate chain, so authenticity is
//! checked by PayPal's verify-webhook-signature API rather than in process.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, warn};

use super::{decimal, header, json_body, missing, text, Notification, Parsed, PaymentProvider, PaymentStatus, Verification};
use crate::config::ProviderSecrets;
use crate::{PaymentProgress, Result};

const LIVE_API_BASE: &str = "https://api-m.paypal.com";

/// Transmission headers and the field each maps to in the verification request.
const TRANSMISSION_FIELDS: [(&str, &str); 5] = [
    ("paypal-auth-algo", "auth_algo"),
    ("paypal-cert-url", "cert_url"),
    ("paypal-transmission-id", "transmission_id"),
    ("paypal-transmission-sig", "transmission_sig"),
    ("paypal-transmission-time", "transmission_time"),
];

#[derive(Clone, Debug)]
pub struct PayPalApi {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl PayPalApi {
    pub fn from_secrets(secrets: &ProviderSecrets) -> Option<Self> {
        Some(Self {
            base_url: secrets.paypal_api_base.clone().unwrap_or_else(|| LIVE_API_BASE.to_string()),
            client_id: secrets.paypal_client_id.clone()?,
            client_secret: secrets.paypal_client_secret.clone()?,
        })
    }
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct VerificationResponse {
    verification_status: String,
}

pub struct PayPal {
    webhook_id: Option<String>,
    api: Option<PayPalApi>,
    client: reqwest::Client,
}

impl PayPal {
    pub fn new(webhook_id: Option<String>, api: Option<PayPalApi>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { webhook_id, api, client }
    }

    async fn verify_remote(&self, api: &PayPalApi, webhook_id: &str, event: Value, headers: &HeaderMap) -> reqwest::Result<Option<String>> {
        let mut request = serde_json::Map::new();
        for (name, field) in TRANSMISSION_FIELDS {
            let Some(value) = header(headers, name) else { return Ok(None) };
            request.insert(field.to_string(), json!(value));
        }
        request.insert("webhook_id".into(), json!(webhook_id));
        request.insert("webhook_event".into(), event);

        let base = api.base_url.trim_end_matches('/');
        let token: AccessToken = self.client
            .post(format!("{base}/v1/oauth2/token"))
            .basic_auth(&api.client_id, Some(&api.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let verdict: VerificationResponse = self.client
            .post(format!("{base}/v1/notifications/verify-webhook-signature"))
            .bearer_auth(&token.access_token)
            .json(&Value::Object(request))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Some(verdict.verification_status))
    }
}

fn status_for(event_type: &str) -> Option<PaymentStatus> {
    let status = match event_type {
        "PAYMENT.CAPTURE.COMPLETED" | "CHECKOUT.ORDER.COMPLETED" => PaymentStatus::Paid,
        "CHECKOUT.ORDER.APPROVED" | "PAYMENT.CAPTURE.PENDING" => PaymentStatus::Pending(PaymentProgress::Confirming),
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => PaymentStatus::Failed,
        "CHECKOUT.ORDER.VOIDED" => PaymentStatus::Expired,
        _ => return None,
    };
    Some(status)
}

#[async_trait]
impl PaymentProvider for PayPal {
    fn name(&self) -> &'static str { "paypal" }

    fn verify(&self, _raw: &[u8], _headers: &HeaderMap) -> Verification {
        Verification::Skipped("paypal signatures require a remote verification call")
    }

    async fn authenticate(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        let (Some(webhook_id), Some(api)) = (self.webhook_id.as_deref(), self.api.as_ref()) else {
            return Verification::Skipped("webhook id or api credentials not configured");
        };
        let Ok(event) = serde_json::from_slice::<Value>(raw) else { return Verification::Invalid };
        match self.verify_remote(api, webhook_id, event, headers).await {
            Ok(Some(status)) if status == "SUCCESS" => Verification::Valid,
            Ok(Some(status)) => {
                warn!(%status, "paypal rejected webhook signature");
                Verification::Invalid
            }
            Ok(None) => Verification::Invalid,
            Err(e) => {
                error!(error = %e, "paypal signature verification unavailable");
                Verification::Invalid
            }
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed> {
        let body = json_body(raw)?;
        let event = body["event_type"].as_str().ok_or_else(|| missing("event_type"))?.to_string();
        let Some(status) = status_for(&event) else { return Ok(Parsed::Ignored { event }) };

        let resource = &body["resource"];
        let unit = &resource["purchase_units"][0];
        let order_ref = text(&resource["custom_id"])
            .or_else(|| text(&unit["custom_id"]))
            .ok_or_else(|| missing("resource.custom_id"))?;
        let amount = decimal(&resource["amount"]["value"]).or_else(|| decimal(&unit["amount"]["value"]));
        Ok(Parsed::Notification(Notification { order_ref, status, amount, original_amount: None, event }))
    }
}
