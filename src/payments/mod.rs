//! Payment reconciliation.
//!
//! Every provider is an adapter that authenticates a raw notification and
//! turns it into a [`Notification`]. The order-side effects live once, in
//! [`reconciler::Reconciler`].

pub mod cryptomus;
pub mod lemonsqueezy;
pub mod nowpayments;
pub mod oxapay;
pub mod paypal;
pub mod reconciler;
pub mod sellauth;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderSecrets;
use crate::{Money, PaymentProgress, Result, StorefrontError};

pub use reconciler::{Outcome, Reconciler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
    /// No check performed; the reason is logged by the reconciler.
    Skipped(&'static str),
}

/// Provider status mapped onto the order lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Pending(PaymentProgress),
    Failed,
    Expired,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Order id or order number as sent back by the provider.
    pub order_ref: String,
    pub status: PaymentStatus,
    /// Amount the provider reports as paid, in its own (possibly quantised) terms.
    pub amount: Option<Decimal>,
    /// True price carried in metadata by providers that quantise the charge.
    pub original_amount: Option<Decimal>,
    pub event: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Parsed {
    Notification(Notification),
    /// A well-formed notification with no bearing on order state.
    Ignored { event: String },
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// In-process signature check over the raw body.
    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Verification;

    /// What the reconciler calls. Providers whose check needs a round trip
    /// to their API override this.
    async fn authenticate(&self, raw: &[u8], headers: &HeaderMap) -> Verification {
        self.verify(raw, headers)
    }

    fn parse(&self, raw: &[u8]) -> Result<Parsed>;

    /// What the provider is asked to charge for `total`.
    fn charge_amount(&self, total: Money) -> Money {
        total
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha512,
}

pub fn hmac_hex(algorithm: HmacAlgorithm, key: &[u8], data: &[u8]) -> Result<String> {
    let invalid_key = |_| StorefrontError::InvalidSignature;
    let digest = match algorithm {
        HmacAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            hex::encode(mac.finalize().into_bytes())
        }
        HmacAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            hex::encode(mac.finalize().into_bytes())
        }
    };
    Ok(digest)
}

/// Shared shape of the header-HMAC providers.
pub(crate) fn check_hmac(
    algorithm: HmacAlgorithm,
    secret: Option<&str>,
    data: &[u8],
    provided: Option<&str>,
) -> Verification {
    let Some(secret) = secret else { return Verification::Skipped("no signing secret configured") };
    let Some(provided) = provided else { return Verification::Invalid };
    match hmac_hex(algorithm, secret.as_bytes(), data) {
        Ok(expected) if digest_eq(&expected, provided) => Verification::Valid,
        _ => Verification::Invalid,
    }
}

/// Compares hex digests case-insensitively in constant time.
pub fn digest_eq(expected: &str, provided: &str) -> bool {
    let provided = provided.trim();
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a.to_ascii_lowercase() ^ b.to_ascii_lowercase()))
        == 0
}

pub(crate) fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) fn json_body(raw: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(raw).map_err(|e| StorefrontError::MalformedPayload(e.to_string()))
}

/// Reads a string or number field as a string.
pub(crate) fn text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a decimal carried either as a JSON string or a JSON number.
pub(crate) fn decimal(value: &serde_json::Value) -> Option<Decimal> {
    text(value).and_then(|s| s.parse().ok())
}

pub(crate) fn missing(field: &str) -> StorefrontError {
    StorefrontError::MalformedPayload(format!("missing {field}"))
}

/// Provider adapters keyed by their route name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn from_secrets(secrets: &ProviderSecrets) -> Self {
        let mut registry = Self::default();
        registry.register(paypal::PayPal::new(secrets.paypal_webhook_id.clone(), paypal::PayPalApi::from_secrets(secrets)));
        registry.register(nowpayments::NowPayments::new(secrets.nowpayments_ipn_secret.clone()));
        registry.register(cryptomus::Cryptomus::new(secrets.cryptomus_api_key.clone()));
        registry.register(oxapay::OxaPay::new(secrets.oxapay_merchant_key.clone()));
        registry.register(lemonsqueezy::LemonSqueezy::new(secrets.lemonsqueezy_signing_secret.clone()));
        registry.register(sellauth::SellAuth::new(secrets.sellauth_webhook_secret.clone()));
        registry
    }

    pub fn register(&mut self, provider: impl PaymentProvider + 'static) {
        self.providers.insert(provider.name(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentProvider>> {
        self.providers
            .get(name.to_ascii_lowercase().as_str())
            .cloned()
            .ok_or_else(|| StorefrontError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hmac_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            hmac_hex(HmacAlgorithm::Sha256, b"Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_digest_eq() {
        let sig = hmac_hex(HmacAlgorithm::Sha512, b"k", b"body").unwrap();
        assert!(digest_eq(&sig, &sig.to_uppercase()));
        assert!(!digest_eq(&sig, &sig[1..]));
        assert!(!digest_eq(&sig, &hmac_hex(HmacAlgorithm::Sha512, b"k", b"other").unwrap()));
    }

    #[test]
    fn test_check_hmac() {
        let sig = hmac_hex(HmacAlgorithm::Sha256, b"secret", b"{}").unwrap();
        assert_eq!(check_hmac(HmacAlgorithm::Sha256, Some("secret"), b"{}", Some(&sig)), Verification::Valid);
        assert_eq!(check_hmac(HmacAlgorithm::Sha256, Some("secret"), b"{ }", Some(&sig)), Verification::Invalid);
        assert_eq!(check_hmac(HmacAlgorithm::Sha256, Some("secret"), b"{}", None), Verification::Invalid);
        assert!(matches!(check_hmac(HmacAlgorithm::Sha256, None, b"{}", None), Verification::Skipped(_)));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::from_secrets(&ProviderSecrets::default());
        assert_eq!(registry.names(), vec!["cryptomus", "lemonsqueezy", "nowpayments", "oxapay", "paypal", "sellauth"]);
        assert_eq!(registry.get("OxaPay").unwrap().name(), "oxapay");
        assert!(matches!(registry.get("stripe"), Err(StorefrontError::UnknownProvider(_))));
    }

    #[test]
    fn test_numeric_fields() {
        assert_eq!(decimal(&serde_json::json!("12.50")), Some(Decimal::new(1250, 2)));
        assert_eq!(decimal(&serde_json::json!(3)), Some(Decimal::from(3)));
        assert_eq!(text(&serde_json::json!("")), None);
    }
}
