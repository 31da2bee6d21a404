//! Environment configuration.
//!
//! `.env` is loaded by `main` through dotenvy; everything here reads plain
//! process environment variables and falls back to the documented defaults.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_EXPIRY_MINUTES: i64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_WARRANTY_DAYS: i64 = 7;
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 20;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_CAPACITY: usize = 10_000;
const DEV_JWT_SECRET: &str = "storefront-development-secret-change-me";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("configuration rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Webhook secrets. A missing secret means the provider's signature check is skipped.
#[derive(Clone, Debug, Default)]
pub struct ProviderSecrets {
    pub paypal_webhook_id: Option<String>,
    /// REST credentials for PayPal's verify-webhook-signature call.
    pub paypal_client_id: Option<String>,
    pub paypal_client_secret: Option<String>,
    pub paypal_api_base: Option<String>,
    pub nowpayments_ipn_secret: Option<String>,
    pub cryptomus_api_key: Option<String>,
    pub oxapay_merchant_key: Option<String>,
    pub lemonsqueezy_signing_secret: Option<String>,
    pub sellauth_webhook_secret: Option<String>,
}

#[derive(Clone, Debug, Validate)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    #[validate(length(min = 16))]
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    pub min_topup_amount: Decimal,
    #[validate(range(min = 1))]
    pub order_expiry_minutes: i64,
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
    #[validate(range(min = 0))]
    pub default_warranty_days: i64,
    #[validate(range(min = 1))]
    pub rate_limit_max_requests: u32,
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: u64,
    #[validate(range(min = 1))]
    pub rate_limit_capacity: usize,
    pub nats_url: Option<String>,
    pub providers: ProviderSecrets,
    /// Lets paid notifications through when the provider could not verify them.
    pub allow_unverified_webhooks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_PORT,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            store_backend: StoreBackend::Memory,
            min_topup_amount: Decimal::ONE,
            order_expiry_minutes: DEFAULT_EXPIRY_MINUTES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            default_warranty_days: DEFAULT_WARRANTY_DAYS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            rate_limit_capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            nats_url: None,
            providers: ProviderSecrets::default(),
            allow_unverified_webhooks: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let database_url = var("DATABASE_URL");
        let store_backend = match var("STORE_BACKEND") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: "STORE_BACKEND", value: v })?,
            None if database_url.is_some() => StoreBackend::Postgres,
            None => StoreBackend::Memory,
        };
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if store_backend == StoreBackend::Memory => defaults.jwt_secret,
            None => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let config = Self {
            database_url,
            port: parse_or(&var, "PORT", defaults.port)?,
            jwt_secret,
            store_backend,
            min_topup_amount: parse_or(&var, "MIN_TOPUP_AMOUNT", defaults.min_topup_amount)?,
            order_expiry_minutes: parse_or(&var, "ORDER_EXPIRY_MINUTES", defaults.order_expiry_minutes)?,
            sweep_interval_secs: parse_or(&var, "SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            default_warranty_days: parse_or(&var, "DEFAULT_WARRANTY_DAYS", defaults.default_warranty_days)?,
            rate_limit_max_requests: parse_or(&var, "RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit_max_requests)?,
            rate_limit_window_secs: parse_or(&var, "RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?,
            rate_limit_capacity: parse_or(&var, "RATE_LIMIT_CAPACITY", defaults.rate_limit_capacity)?,
            nats_url: var("NATS_URL"),
            providers: ProviderSecrets {
                paypal_webhook_id: var("PAYPAL_WEBHOOK_ID"),
                paypal_client_id: var("PAYPAL_CLIENT_ID"),
                paypal_client_secret: var("PAYPAL_CLIENT_SECRET"),
                paypal_api_base: var("PAYPAL_API_BASE"),
                nowpayments_ipn_secret: var("NOWPAYMENTS_IPN_SECRET"),
                cryptomus_api_key: var("CRYPTOMUS_API_KEY"),
                oxapay_merchant_key: var("OXAPAY_MERCHANT_KEY"),
                lemonsqueezy_signing_secret: var("LEMONSQUEEZY_SIGNING_SECRET"),
                sellauth_webhook_secret: var("SELLAUTH_WEBHOOK_SECRET"),
            },
            allow_unverified_webhooks: parse_or(&var, "ALLOW_UNVERIFIED_WEBHOOKS", defaults.allow_unverified_webhooks)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn order_policy(&self) -> crate::orders::OrderPolicy {
        crate::orders::OrderPolicy {
            min_topup: crate::Money::new(self.min_topup_amount),
            default_warranty_days: self.default_warranty_days,
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
