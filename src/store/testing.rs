//! Store wrapper that yields to the scheduler before every call, so two
//! futures driven by `tokio::join!` interleave at each store boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::yield_now;
use uuid::Uuid;

use super::{LineDelivery, Store, UnitSource, WalletEntry, WalletWrite};
use crate::{
    FlashSale, InventoryRecord, Order, OrderLine, OrderState, Product, ProductVariant, Result, Wallet,
    WalletTransaction,
};

pub struct YieldingStore<S> {
    inner: S,
}

impl<S: Store> YieldingStore<S> {
    pub fn new(inner: S) -> Self { Self { inner } }
}

#[async_trait]
impl<S: Store> Store for YieldingStore<S> {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        yield_now().await;
        self.inner.product(id).await
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>> {
        yield_now().await;
        self.inner.variant(id).await
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        yield_now().await;
        self.inner.active_products().await
    }

    async fn variants_of(&self, product_id: Uuid) -> Result<Vec<ProductVariant>> {
        yield_now().await;
        self.inner.variants_of(product_id).await
    }

    async fn live_flash_sale(&self, product_id: Uuid, variant_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Option<FlashSale>> {
        yield_now().await;
        self.inner.live_flash_sale(product_id, variant_id, now).await
    }

    async fn add_flash_sale_sold(&self, sale_id: Uuid, quantity: i32) -> Result<Option<FlashSale>> {
        yield_now().await;
        self.inner.add_flash_sale_sold(sale_id, quantity).await
    }

    async fn add_product_sales(&self, product_id: Uuid, quantity: i32) -> Result<()> {
        yield_now().await;
        self.inner.add_product_sales(product_id, quantity).await
    }

    async fn count_unsold(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<i64> {
        yield_now().await;
        self.inner.count_unsold(product_id, variant_id).await
    }

    async fn template_record(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<Option<InventoryRecord>> {
        yield_now().await;
        self.inner.template_record(product_id, variant_id).await
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        yield_now().await;
        self.inner.insert_order(order).await
    }

    async fn insert_order_line(&self, line: &OrderLine) -> Result<()> {
        yield_now().await;
        self.inner.insert_order_line(line).await
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        yield_now().await;
        self.inner.order(id).await
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        yield_now().await;
        self.inner.order_by_number(order_number).await
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        yield_now().await;
        self.inner.orders_for_user(user_id).await
    }

    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
        yield_now().await;
        self.inner.order_lines(order_id).await
    }

    async fn transition_order(&self, order_id: Uuid, from: OrderState, to: OrderState, warranty_expires_at: Option<DateTime<Utc>>) -> Result<bool> {
        yield_now().await;
        self.inner.transition_order(order_id, from, to, warranty_expires_at).await
    }

    async fn deliver_unit(&self, line_id: Uuid, source: &UnitSource, now: DateTime<Utc>) -> Result<LineDelivery> {
        yield_now().await;
        self.inner.deliver_unit(line_id, source, now).await
    }

    async fn mark_line_fulfilled(&self, line_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        yield_now().await;
        self.inner.mark_line_fulfilled(line_id, now).await
    }

    async fn stale_unpaid_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>> {
        yield_now().await;
        self.inner.stale_unpaid_orders(created_before).await
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        yield_now().await;
        self.inner.wallet(user_id).await
    }

    async fn wallet_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        yield_now().await;
        self.inner.wallet_transactions(user_id, limit).await
    }

    async fn apply_wallet_entry(&self, entry: &WalletEntry) -> Result<WalletWrite> {
        yield_now().await;
        self.inner.apply_wallet_entry(entry).await
    }
}
