//! Persistence seam.
//!
//! Every money- or stock-moving operation is a single conditional write at
//! this layer: delivering a unit onto an order line, applying a wallet entry
//! and moving an order between states either succeed atomically or report
//! that they lost the race. Nothing above this trait does read-then-write on
//! shared rows.

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    DeliveredUnit, FlashSale, InventoryRecord, Order, OrderLine, OrderState, Product, ProductVariant, Result,
    TransactionKind, Wallet, WalletTransaction,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A wallet mutation. `amount` is signed; negative entries are debits.
#[derive(Clone, Debug)]
pub struct WalletEntry {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    /// Idempotency key together with the entry's direction: an order is
    /// credited at most once and debited at most once, whatever the `kind`.
    pub order_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WalletWrite {
    Applied { balance: Decimal },
    /// The order already carries an entry in the same direction.
    Duplicate { balance: Decimal },
    Insufficient { available: Decimal },
}

/// Where the next unit of a line comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitSource {
    /// Unlimited variants hand every buyer the same payload.
    Shared { payload: String },
    /// One unsold record of this product/variant, consumed on delivery.
    Stock { product_id: Uuid, variant_id: Option<Uuid> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineDelivery {
    Attached(DeliveredUnit),
    /// The line already holds `quantity` units; nothing was consumed.
    LineFull,
    OutOfStock,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- catalog ---
    async fn product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>>;
    async fn active_products(&self) -> Result<Vec<Product>>;
    async fn variants_of(&self, product_id: Uuid) -> Result<Vec<ProductVariant>>;
    /// Live sale scoped to exactly this `(product, variant)` pair.
    async fn live_flash_sale(&self, product_id: Uuid, variant_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Option<FlashSale>>;
    /// Adds `quantity` atomically and returns the updated sale.
    async fn add_flash_sale_sold(&self, sale_id: Uuid, quantity: i32) -> Result<Option<FlashSale>>;
    async fn add_product_sales(&self, product_id: Uuid, quantity: i32) -> Result<()>;

    // --- inventory ---
    async fn count_unsold(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<i64>;
    /// Any matching record, sold or not, without touching it.
    async fn template_record(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<Option<InventoryRecord>>;

    // --- orders ---
    /// Fails with `Conflict` when the order number is taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;
    /// Idempotent on the line id.
    async fn insert_order_line(&self, line: &OrderLine) -> Result<()>;
    async fn order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;
    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>>;
    /// Compare-and-swap on the order state. Returns `false` when the stored
    /// state is no longer `from`.
    async fn transition_order(&self, order_id: Uuid, from: OrderState, to: OrderState, warranty_expires_at: Option<DateTime<Utc>>) -> Result<bool>;
    /// Attaches one unit to the line unless it already holds its quantity.
    /// Consuming the stock record and attaching it commit together, and two
    /// concurrent callers never receive the same record.
    async fn deliver_unit(&self, line_id: Uuid, source: &UnitSource, now: DateTime<Utc>) -> Result<LineDelivery>;
    /// Stamps `fulfilled_at` once. Returns `true` only for the caller that stamped it.
    async fn mark_line_fulfilled(&self, line_id: Uuid, now: DateTime<Utc>) -> Result<bool>;
    async fn stale_unpaid_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>>;

    // --- wallet ---
    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>>;
    async fn wallet_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>>;
    /// Applies the entry and appends its transaction in one atomic step,
    /// creating the wallet on first credit. Debits never drive the balance negative.
    async fn apply_wallet_entry(&self, entry: &WalletEntry) -> Result<WalletWrite>;
}
