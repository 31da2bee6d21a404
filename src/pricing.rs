//! Pricing Resolver: unit price for a cart line at a point in time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::CatalogItem;
use crate::store::Store;
use crate::{FlashSale, Money, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub unit_price: Money,
    /// Set when a flash sale priced this line; its `sold_quantity` is bumped on delivery.
    pub flash_sale_id: Option<Uuid>,
}

impl PriceQuote {
    pub fn is_flash(&self) -> bool { self.flash_sale_id.is_some() }
}

/// Applies `sale` when it is live at `now` and still has room for `quantity`.
/// The sale must already be scoped to the item's exact product/variant pair.
pub fn quote(item: &CatalogItem, sale: Option<&FlashSale>, quantity: u32, now: DateTime<Utc>) -> PriceQuote {
    let base = PriceQuote { unit_price: item.base_price(), flash_sale_id: None };
    let Some(sale) = sale else { return base };
    if sale.product_id != item.product_id() || sale.variant_id != item.variant_id() {
        return base;
    }
    if !sale.is_live(now) || !sale.admits(quantity as i32) {
        return base;
    }
    PriceQuote { unit_price: Money::new(sale.sale_price), flash_sale_id: Some(sale.id) }
}

/// Reads the live sale for the item and prices it. No side effects.
pub async fn resolve(store: &dyn Store, item: &CatalogItem, quantity: u32, now: DateTime<Utc>) -> Result<PriceQuote> {
    let sale = store.live_flash_sale(item.product_id(), item.variant_id(), now).await?;
    Ok(quote(item, sale.as_ref(), quantity, now))
}
