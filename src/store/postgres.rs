//! Postgres store on sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{LineDelivery, Store, UnitSource, WalletEntry, WalletWrite};
use crate::{
    DeliveredUnit, FlashSale, InventoryRecord, Order, OrderLine, OrderState, PaymentMethod, Product, ProductVariant,
    Result, StorefrontError, Wallet, WalletTransaction,
};

const ORDER_COLUMNS: &str = "id, user_id, order_number, total_amount, status, payment_status, cancel_reason, payment_method, warranty_expires_at, created_at, updated_at";
const RECORD_COLUMNS: &str = "id, product_id, variant_id, account_data AS payload, is_sold, sold_at";
const SALE_COLUMNS: &str = "id, product_id, variant_id, sale_price, starts_at, ends_at, is_active, max_quantity, sold_quantity";
const STALE_BATCH: i64 = 500;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, price: Decimal, product_type: String, is_active: bool, sales_count: i64, warranty_days: Option<i32>, created_at: DateTime<Utc> }

impl TryFrom<ProductRow> for Product {
    type Error = StorefrontError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product { id: r.id, name: r.name, price: r.price, product_type: r.product_type.parse()?, is_active: r.is_active,
                     sales_count: r.sales_count, warranty_days: r.warranty_days, created_at: r.created_at })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid, user_id: Uuid, order_number: String, total_amount: Decimal, status: String, payment_status: String,
    cancel_reason: Option<String>, payment_method: String, warranty_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StorefrontError;
    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            id: r.id, user_id: r.user_id, order_number: r.order_number, total: r.total_amount,
            state: OrderState::from_columns(&r.status, &r.payment_status, r.cancel_reason.as_deref())?,
            payment_method: PaymentMethod::parse(&r.payment_method), warranty_expires_at: r.warranty_expires_at,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    id: Uuid, order_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>, product_type: String, quantity: i32,
    unit_price: Decimal, flash_sale_id: Option<Uuid>, fulfilled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow { order_item_id: Uuid, account_id: Option<Uuid>, account_data: String }

#[derive(Debug, sqlx::FromRow)]
struct WalletTransactionRow {
    id: Uuid, user_id: Uuid, kind: String, amount: Decimal, description: String, order_id: Option<Uuid>,
    status: String, created_at: DateTime<Utc>,
}

impl TryFrom<WalletTransactionRow> for WalletTransaction {
    type Error = StorefrontError;
    fn try_from(r: WalletTransactionRow) -> Result<Self> {
        Ok(WalletTransaction { id: r.id, user_id: r.user_id, kind: r.kind.parse()?, amount: r.amount,
                               description: r.description, order_id: r.order_id, status: r.status, created_at: r.created_at })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl Store for PgStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT id, name, price, product_type, is_active, sales_count, warranty_days, created_at FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?.map(Product::try_from).transpose()
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>> {
        Ok(sqlx::query_as::<_, ProductVariant>("SELECT id, product_id, name, price, is_unlimited, is_active, warranty_days FROM product_variants WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?)
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT id, name, price, product_type, is_active, sales_count, warranty_days, created_at FROM products WHERE is_active ORDER BY created_at DESC")
            .fetch_all(&self.pool).await?.into_iter().map(Product::try_from).collect()
    }

    async fn variants_of(&self, product_id: Uuid) -> Result<Vec<ProductVariant>> {
        Ok(sqlx::query_as::<_, ProductVariant>("SELECT id, product_id, name, price, is_unlimited, is_active, warranty_days FROM product_variants WHERE product_id = $1 ORDER BY price")
            .bind(product_id).fetch_all(&self.pool).await?)
    }

    async fn live_flash_sale(&self, product_id: Uuid, variant_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Option<FlashSale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM flash_sales WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 \
             AND is_active AND starts_at <= $3 AND ends_at >= $3 ORDER BY sale_price LIMIT 1"
        );
        Ok(sqlx::query_as::<_, FlashSale>(&sql).bind(product_id).bind(variant_id).bind(now).fetch_optional(&self.pool).await?)
    }

    async fn add_flash_sale_sold(&self, sale_id: Uuid, quantity: i32) -> Result<Option<FlashSale>> {
        let sql = format!("UPDATE flash_sales SET sold_quantity = sold_quantity + $2 WHERE id = $1 RETURNING {SALE_COLUMNS}");
        Ok(sqlx::query_as::<_, FlashSale>(&sql).bind(sale_id).bind(quantity).fetch_optional(&self.pool).await?)
    }

    async fn add_product_sales(&self, product_id: Uuid, quantity: i32) -> Result<()> {
        sqlx::query("UPDATE products SET sales_count = sales_count + $2 WHERE id = $1")
            .bind(product_id).bind(quantity as i64).execute(&self.pool).await?;
        Ok(())
    }

    async fn count_unsold(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM product_accounts WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 AND NOT is_sold")
            .bind(product_id).bind(variant_id).fetch_one(&self.pool).await?;
        Ok(count.0)
    }

    async fn template_record(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<Option<InventoryRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM product_accounts WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 ORDER BY created_at LIMIT 1");
        Ok(sqlx::query_as::<_, InventoryRecord>(&sql).bind(product_id).bind(variant_id).fetch_optional(&self.pool).await?)
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let (status, payment_status) = order.state.columns();
        let res = sqlx::query("INSERT INTO orders (id, user_id, order_number, total_amount, status, payment_status, cancel_reason, payment_method, warranty_expires_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
            .bind(order.id).bind(order.user_id).bind(&order.order_number).bind(order.total).bind(status).bind(payment_status)
            .bind(order.state.cancel_reason()).bind(order.payment_method.as_str()).bind(order.warranty_expires_at)
            .bind(order.created_at).bind(order.updated_at)
            .execute(&self.pool).await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorefrontError::Conflict(format!("order number {} exists", order.order_number))),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_order_line(&self, line: &OrderLine) -> Result<()> {
        sqlx::query("INSERT INTO order_items (id, order_id, product_id, variant_id, product_type, quantity, unit_price, flash_sale_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING")
            .bind(line.id).bind(line.order_id).bind(line.product_id).bind(line.variant_id).bind(line.product_type.as_str())
            .bind(line.quantity).bind(line.unit_price).bind(line.flash_sale_id)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&self.pool).await?.map(Order::try_from).transpose()
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        sqlx::query_as::<_, OrderRow>(&sql).bind(order_number).fetch_optional(&self.pool).await?.map(Order::try_from).transpose()
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100");
        sqlx::query_as::<_, OrderRow>(&sql).bind(user_id).fetch_all(&self.pool).await?.into_iter().map(Order::try_from).collect()
    }

    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query_as::<_, OrderLineRow>("SELECT id, order_id, product_id, variant_id, product_type, quantity, unit_price, flash_sale_id, fulfilled_at FROM order_items WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id).fetch_all(&self.pool).await?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let deliveries = sqlx::query_as::<_, DeliveryRow>("SELECT order_item_id, account_id, account_data FROM order_item_deliveries WHERE order_item_id = ANY($1) ORDER BY id")
            .bind(&ids).fetch_all(&self.pool).await?;
        let mut by_line: HashMap<Uuid, Vec<DeliveredUnit>> = HashMap::new();
        for d in deliveries {
            by_line.entry(d.order_item_id).or_default().push(DeliveredUnit { record_id: d.account_id, payload: d.account_data });
        }
        rows.into_iter()
            .map(|r| Ok(OrderLine {
                deliveries: by_line.remove(&r.id).unwrap_or_default(),
                id: r.id, order_id: r.order_id, product_id: r.product_id, variant_id: r.variant_id,
                product_type: r.product_type.parse()?, quantity: r.quantity, unit_price: r.unit_price,
                flash_sale_id: r.flash_sale_id, fulfilled_at: r.fulfilled_at,
            }))
            .collect()
    }

    async fn transition_order(&self, order_id: Uuid, from: OrderState, to: OrderState, warranty_expires_at: Option<DateTime<Utc>>) -> Result<bool> {
        let (from_status, from_payment) = from.columns();
        let (to_status, to_payment) = to.columns();
        let res = sqlx::query(
            "UPDATE orders SET status = $5, payment_status = $6, cancel_reason = $7, \
             warranty_expires_at = COALESCE($8, warranty_expires_at), updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND payment_status = $3 AND cancel_reason IS NOT DISTINCT FROM $4",
        )
        .bind(order_id).bind(from_status).bind(from_payment).bind(from.cancel_reason())
        .bind(to_status).bind(to_payment).bind(to.cancel_reason()).bind(warranty_expires_at)
        .execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn deliver_unit(&self, line_id: Uuid, source: &UnitSource, now: DateTime<Utc>) -> Result<LineDelivery> {
        let mut tx = self.pool.begin().await?;
        // Row lock serialises deliveries onto this line until commit.
        let locked: Option<(i32,)> = sqlx::query_as("SELECT quantity FROM order_items WHERE id = $1 FOR UPDATE")
            .bind(line_id).fetch_optional(&mut *tx).await?;
        let Some((quantity,)) = locked else {
            return Err(StorefrontError::StorageError(format!("order line {line_id} missing")));
        };
        let (delivered,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM order_item_deliveries WHERE order_item_id = $1")
            .bind(line_id).fetch_one(&mut *tx).await?;
        if delivered >= i64::from(quantity) {
            return Ok(LineDelivery::LineFull);
        }

        let unit = match source {
            UnitSource::Shared { payload } => DeliveredUnit { record_id: None, payload: payload.clone() },
            UnitSource::Stock { product_id, variant_id } => {
                // SKIP LOCKED lets concurrent deliveries pick different rows.
                let sql = format!(
                    "UPDATE product_accounts SET is_sold = TRUE, sold_at = $3 \
                     WHERE id = (SELECT id FROM product_accounts \
                                 WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 AND NOT is_sold \
                                 ORDER BY created_at LIMIT 1 FOR UPDATE SKIP LOCKED) \
                       AND NOT is_sold \
                     RETURNING {RECORD_COLUMNS}"
                );
                let claimed = sqlx::query_as::<_, InventoryRecord>(&sql)
                    .bind(*product_id).bind(*variant_id).bind(now).fetch_optional(&mut *tx).await?;
                let Some(record) = claimed else { return Ok(LineDelivery::OutOfStock) };
                DeliveredUnit { record_id: Some(record.id), payload: record.payload }
            }
        };

        let res = sqlx::query("INSERT INTO order_item_deliveries (order_item_id, account_id, account_data, delivered_at) VALUES ($1, $2, $3, $4)")
            .bind(line_id).bind(unit.record_id).bind(&unit.payload).bind(now)
            .execute(&mut *tx).await;
        match res {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StorefrontError::Conflict("inventory record already delivered".to_string())),
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        Ok(LineDelivery::Attached(unit))
    }

    async fn mark_line_fulfilled(&self, line_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query("UPDATE order_items SET fulfilled_at = $2 WHERE id = $1 AND fulfilled_at IS NULL")
            .bind(line_id).bind(now).execute(&self.pool).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn stale_unpaid_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending' AND payment_status IN ('pending', 'awaiting_payment') \
             AND created_at < $1 ORDER BY created_at LIMIT $2"
        );
        sqlx::query_as::<_, OrderRow>(&sql).bind(created_before).bind(STALE_BATCH)
            .fetch_all(&self.pool).await?.into_iter().map(Order::try_from).collect()
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        Ok(sqlx::query_as::<_, Wallet>("SELECT user_id, balance, updated_at FROM wallets WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?)
    }

    async fn wallet_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        sqlx::query_as::<_, WalletTransactionRow>("SELECT id, user_id, type AS kind, amount, description, order_id, status, created_at FROM wallet_transactions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(user_id).bind(limit).fetch_all(&self.pool).await?
            .into_iter().map(WalletTransaction::try_from).collect()
    }

    async fn apply_wallet_entry(&self, entry: &WalletEntry) -> Result<WalletWrite> {
        let mut tx = self.pool.begin().await?;
        if entry.amount > Decimal::ZERO {
            sqlx::query("INSERT INTO wallets (user_id, balance, updated_at) VALUES ($1, 0, NOW()) ON CONFLICT (user_id) DO NOTHING")
                .bind(entry.user_id).execute(&mut *tx).await?;
        }
        // Row lock serialises every entry for this user until commit.
        let locked: Option<(Decimal,)> = sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(entry.user_id).fetch_optional(&mut *tx).await?;
        let Some((balance,)) = locked else {
            return Ok(WalletWrite::Insufficient { available: Decimal::ZERO });
        };
        if entry.amount < Decimal::ZERO && balance + entry.amount < Decimal::ZERO {
            return Ok(WalletWrite::Insufficient { available: balance });
        }
        let inserted = sqlx::query("INSERT INTO wallet_transactions (id, user_id, type, amount, description, order_id, status) VALUES ($1, $2, $3, $4, $5, $6, 'completed') ON CONFLICT DO NOTHING")
            .bind(Uuid::now_v7()).bind(entry.user_id).bind(entry.kind.as_str()).bind(entry.amount)
            .bind(&entry.description).bind(entry.order_id)
            .execute(&mut *tx).await?;
        if inserted.rows_affected() == 0 {
            return Ok(WalletWrite::Duplicate { balance });
        }
        let (new_balance,): (Decimal,) = sqlx::query_as("UPDATE wallets SET balance = balance + $2, updated_at = NOW() WHERE user_id = $1 RETURNING balance")
            .bind(entry.user_id).bind(entry.amount).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(WalletWrite::Applied { balance: new_balance })
    }
}
