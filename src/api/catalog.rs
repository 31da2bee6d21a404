use axum::{extract::{Path, State}, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::domain::aggregates::CatalogItem;
use crate::pricing;
use crate::store::Store;
use crate::{Product, ProductType, Result, StorefrontError};

#[derive(Debug, Serialize)]
pub struct PriceView {
    pub base_price: Decimal,
    pub unit_price: Decimal,
    pub flash_sale_id: Option<Uuid>,
    /// Unsold inventory; `None` when the item is not stock-limited.
    pub in_stock: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct VariantView {
    pub id: Uuid,
    pub name: String,
    pub is_unlimited: bool,
    #[serde(flatten)]
    pub price: PriceView,
}

#[derive(Debug, Serialize)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub product_type: ProductType,
    pub warranty_days: Option<i32>,
    pub sales_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub price: PriceView,
    pub variants: Vec<VariantView>,
}

async fn price_of(store: &dyn Store, item: &CatalogItem, now: DateTime<Utc>) -> Result<PriceView> {
    let quote = pricing::resolve(store, item, 1, now).await?;
    let in_stock = if item.requires_stock() {
        Some(store.count_unsold(item.product_id(), item.variant_id()).await?)
    } else {
        None
    };
    Ok(PriceView {
        base_price: item.base_price().amount(),
        unit_price: quote.unit_price.amount(),
        flash_sale_id: quote.flash_sale_id,
        in_stock,
    })
}

async fn view(store: &dyn Store, product: Product) -> Result<ProductView> {
    let now = Utc::now();
    let mut variants = Vec::new();
    for variant in store.variants_of(product.id).await?.into_iter().filter(|v| v.is_active) {
        let (id, name, is_unlimited) = (variant.id, variant.name.clone(), variant.is_unlimited);
        let item = CatalogItem::new(product.clone(), Some(variant))?;
        variants.push(VariantView { id, name, is_unlimited, price: price_of(store, &item, now).await? });
    }
    let item = CatalogItem::new(product, None)?;
    let price = price_of(store, &item, now).await?;
    let product = item.product;
    Ok(ProductView {
        id: product.id,
        name: product.name,
        product_type: product.product_type,
        warranty_days: product.warranty_days,
        sales_count: product.sales_count,
        created_at: product.created_at,
        price,
        variants,
    })
}

pub async fn list_products(State(s): State<AppState>) -> Result<Json<Vec<ProductView>>> {
    let mut out = Vec::new();
    for product in s.store.active_products().await? {
        out.push(view(s.store.as_ref(), product).await?);
    }
    Ok(Json(out))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ProductView>> {
    let product = s.store.product(id).await?.filter(|p| p.is_active).ok_or(StorefrontError::ProductNotFound(id))?;
    Ok(Json(view(s.store.as_ref(), product).await?))
}
