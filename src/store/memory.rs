//! In-process store. Backs the test suite and `STORE_BACKEND=memory`.
//!
//! A single lock guards all tables, so each trait method is atomic in the
//! same sense as its Postgres counterpart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{LineDelivery, Store, UnitSource, WalletEntry, WalletWrite};
use crate::{
    DeliveredUnit, FlashSale, InventoryRecord, Order, OrderLine, OrderState, Product, ProductVariant, Result,
    StorefrontError, Wallet, WalletTransaction,
};

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    variants: HashMap<Uuid, ProductVariant>,
    records: Vec<InventoryRecord>,
    flash_sales: HashMap<Uuid, FlashSale>,
    orders: HashMap<Uuid, Order>,
    lines: Vec<OrderLine>,
    wallets: HashMap<Uuid, Wallet>,
    transactions: Vec<WalletTransaction>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_variant(&self, variant: ProductVariant) {
        self.tables.lock().await.variants.insert(variant.id, variant);
    }

    pub async fn insert_record(&self, record: InventoryRecord) {
        self.tables.lock().await.records.push(record);
    }

    pub async fn insert_flash_sale(&self, sale: FlashSale) {
        self.tables.lock().await.flash_sales.insert(sale.id, sale);
    }

    pub async fn flash_sale(&self, id: Uuid) -> Option<FlashSale> {
        self.tables.lock().await.flash_sales.get(&id).cloned()
    }

    pub async fn record(&self, id: Uuid) -> Option<InventoryRecord> {
        self.tables.lock().await.records.iter().find(|r| r.id == id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Rewrites an order's creation time; used to age orders for the sweeper.
    pub async fn set_order_created_at(&self, order_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(order) = self.tables.lock().await.orders.get_mut(&order_id) {
            order.created_at = created_at;
        }
    }
}

fn matches_scope(record: &InventoryRecord, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
    record.product_id == product_id && record.variant_id == variant_id
}

#[async_trait]
impl Store for MemoryStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>> {
        Ok(self.tables.lock().await.variants.get(&id).cloned())
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        let t = self.tables.lock().await;
        let mut products: Vec<Product> = t.products.values().filter(|p| p.is_active).cloned().collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn variants_of(&self, product_id: Uuid) -> Result<Vec<ProductVariant>> {
        let t = self.tables.lock().await;
        let mut variants: Vec<ProductVariant> = t.variants.values().filter(|v| v.product_id == product_id).cloned().collect();
        variants.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(variants)
    }

    async fn live_flash_sale(&self, product_id: Uuid, variant_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Option<FlashSale>> {
        let t = self.tables.lock().await;
        Ok(t.flash_sales
            .values()
            .filter(|s| s.product_id == product_id && s.variant_id == variant_id && s.is_live(now))
            .min_by(|a, b| a.sale_price.cmp(&b.sale_price))
            .cloned())
    }

    async fn add_flash_sale_sold(&self, sale_id: Uuid, quantity: i32) -> Result<Option<FlashSale>> {
        let mut t = self.tables.lock().await;
        Ok(t.flash_sales.get_mut(&sale_id).map(|s| {
            s.sold_quantity += quantity;
            s.clone()
        }))
    }

    async fn add_product_sales(&self, product_id: Uuid, quantity: i32) -> Result<()> {
        if let Some(p) = self.tables.lock().await.products.get_mut(&product_id) {
            p.sales_count += quantity as i64;
        }
        Ok(())
    }

    async fn count_unsold(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<i64> {
        let t = self.tables.lock().await;
        Ok(t.records.iter().filter(|r| matches_scope(r, product_id, variant_id) && !r.is_sold).count() as i64)
    }

    async fn template_record(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<Option<InventoryRecord>> {
        let t = self.tables.lock().await;
        Ok(t.records.iter().find(|r| matches_scope(r, product_id, variant_id)).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StorefrontError::Conflict(format!("order number {} exists", order.order_number)));
        }
        t.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_line(&self, line: &OrderLine) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.lines.iter().any(|l| l.id == line.id) {
            t.lines.push(line.clone());
        }
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let t = self.tables.lock().await;
        Ok(t.orders.values().find(|o| o.order_number == order_number).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let t = self.tables.lock().await;
        let mut orders: Vec<Order> = t.orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
        let t = self.tables.lock().await;
        Ok(t.lines.iter().filter(|l| l.order_id == order_id).cloned().collect())
    }

    async fn transition_order(&self, order_id: Uuid, from: OrderState, to: OrderState, warranty_expires_at: Option<DateTime<Utc>>) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let Some(order) = t.orders.get_mut(&order_id) else { return Ok(false) };
        if order.state != from {
            return Ok(false);
        }
        order.state = to;
        if warranty_expires_at.is_some() {
            order.warranty_expires_at = warranty_expires_at;
        }
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn deliver_unit(&self, line_id: Uuid, source: &UnitSource, now: DateTime<Utc>) -> Result<LineDelivery> {
        let mut t = self.tables.lock().await;
        let line = t.lines.iter().position(|l| l.id == line_id)
            .ok_or_else(|| StorefrontError::StorageError(format!("order line {line_id} missing")))?;
        if t.lines[line].missing_units() == 0 {
            return Ok(LineDelivery::LineFull);
        }
        let unit = match source {
            UnitSource::Shared { payload } => DeliveredUnit { record_id: None, payload: payload.clone() },
            UnitSource::Stock { product_id, variant_id } => {
                let Some(record) = t.records.iter_mut().find(|r| matches_scope(r, *product_id, *variant_id) && !r.is_sold) else {
                    return Ok(LineDelivery::OutOfStock);
                };
                record.is_sold = true;
                record.sold_at = Some(now);
                DeliveredUnit { record_id: Some(record.id), payload: record.payload.clone() }
            }
        };
        t.lines[line].deliveries.push(unit.clone());
        Ok(LineDelivery::Attached(unit))
    }

    async fn mark_line_fulfilled(&self, line_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock().await;
        match t.lines.iter_mut().find(|l| l.id == line_id) {
            Some(line) if line.fulfilled_at.is_none() => {
                line.fulfilled_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stale_unpaid_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>> {
        let t = self.tables.lock().await;
        let mut orders: Vec<Order> = t.orders.values()
            .filter(|o| o.state.is_unpaid() && o.created_at < created_before)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.tables.lock().await.wallets.get(&user_id).cloned())
    }

    async fn wallet_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        let t = self.tables.lock().await;
        Ok(t.transactions.iter().rev().filter(|tx| tx.user_id == user_id).take(limit.max(0) as usize).cloned().collect())
    }

    async fn apply_wallet_entry(&self, entry: &WalletEntry) -> Result<WalletWrite> {
        let mut t = self.tables.lock().await;
        let balance = t.wallets.get(&entry.user_id).map(|w| w.balance).unwrap_or(Decimal::ZERO);
        let credit = entry.amount > Decimal::ZERO;
        if let Some(order_id) = entry.order_id {
            if t.transactions.iter().any(|tx| tx.order_id == Some(order_id) && (tx.amount > Decimal::ZERO) == credit) {
                return Ok(WalletWrite::Duplicate { balance });
            }
        }
        let new_balance = balance + entry.amount;
        if entry.amount < Decimal::ZERO && new_balance < Decimal::ZERO {
            return Ok(WalletWrite::Insufficient { available: balance });
        }
        let now = Utc::now();
        t.wallets.insert(entry.user_id, Wallet { user_id: entry.user_id, balance: new_balance, updated_at: now });
        t.transactions.push(WalletTransaction {
            id: Uuid::now_v7(),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: entry.amount,
            description: entry.description.clone(),
            order_id: entry.order_id,
            status: "completed".to_string(),
            created_at: now,
        });
        Ok(WalletWrite::Applied { balance: new_balance })
    }
}
