//! OpenSASE Storefront
//!
//! Self-hosted digital-goods storefront: the order workflow behind the catalog.
//!
//! ## Features
//! - Cart pricing with variant prices and flash sales
//! - Pre-provisioned inventory delivery (account credentials)
//! - Wallet balances with an append-only transaction log
//! - Idempotent payment reconciliation for six providers
//! - Expiry sweeping of abandoned orders

pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod events;
pub mod fulfillment;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod rate_limit;
pub mod store;
pub mod sweeper;
pub mod wallet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub use domain::aggregates::{CancelReason, DeliveredUnit, Order, OrderLine, OrderState, PaymentProgress};
pub use domain::value_objects::{Money, OrderNumber};

// =============================================================================
// Core Types
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Account,
    Service,
    Bundle,
    Code,
    Subscription,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Service => "service",
            Self::Bundle => "bundle",
            Self::Code => "code",
            Self::Subscription => "subscription",
        }
    }

    /// Only `account` products draw from pre-provisioned inventory.
    pub fn is_inventory_bearing(&self) -> bool {
        matches!(self, Self::Account)
    }
}

impl FromStr for ProductType {
    type Err = StorefrontError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "account" => Ok(Self::Account),
            "service" => Ok(Self::Service),
            "bundle" => Ok(Self::Bundle),
            "code" => Ok(Self::Code),
            "subscription" => Ok(Self::Subscription),
            other => Err(StorefrontError::StorageError(format!("unknown product type '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub product_type: ProductType,
    pub is_active: bool,
    pub sales_count: i64,
    pub warranty_days: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_unlimited: bool,
    pub is_active: bool,
    pub warranty_days: Option<i32>,
}

/// A pre-provisioned, single-use credential payload ("account").
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub payload: String,
    pub is_sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct FlashSale {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sale_price: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub max_quantity: Option<i32>,
    pub sold_quantity: i32,
}

impl FlashSale {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now <= self.ends_at
    }

    /// Whether `quantity` more units fit under the cap.
    pub fn admits(&self, quantity: i32) -> bool {
        match self.max_quantity {
            None => true,
            Some(max) => self.sold_quantity + quantity <= max,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Wallet,
    WalletTopup,
    External(String),
}

impl From<String> for PaymentMethod {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.as_str().to_string()
    }
}

impl PaymentMethod {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "wallet" => Self::Wallet,
            "wallet_topup" => Self::WalletTopup,
            other => Self::External(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Wallet => "wallet",
            Self::WalletTopup => "wallet_topup",
            Self::External(tag) => tag,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Topup,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Topup => "topup",
            Self::Deposit => "deposit",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = StorefrontError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "topup" => Ok(Self::Topup),
            "deposit" => Ok(Self::Deposit),
            other => Err(StorefrontError::StorageError(format!("unknown transaction kind '{other}'"))),
        }
    }
}

/// Append-only wallet log entry. `amount` is signed: debits are negative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Variant not found: {0}")]
    VariantNotFound(Uuid),

    #[error("Product is not available: {0}")]
    ProductInactive(Uuid),

    #[error("Order not found")]
    OrderNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Top-up amount is below the minimum of {minimum}")]
    TopupBelowMinimum { minimum: Decimal },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: i64, available: i64 },

    #[error("No matching inventory for product {product_id}")]
    NoMatchingInventory { product_id: Uuid, variant_id: Option<Uuid> },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Invalid order transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Could not allocate a unique order number")]
    OrderNumberCollision,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for StorefrontError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
