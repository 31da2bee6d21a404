//! Inventory Allocator.
//!
//! Stock checks count unsold records. Allocation either borrows an unlimited
//! variant's template payload or consumes one unsold record, and attaches the
//! unit to its order line in the same store write, so a record is never
//! handed out twice and a line never receives more than its quantity.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::CatalogItem;
use crate::store::{LineDelivery, Store, UnitSource};
use crate::{DeliveredUnit, Result, StorefrontError};

pub struct InventoryAllocator<'a> {
    store: &'a dyn Store,
}

impl<'a> InventoryAllocator<'a> {
    pub fn new(store: &'a dyn Store) -> Self { Self { store } }

    /// Pre-check at order time. No-op for unlimited variants and non-account products.
    pub async fn ensure_stock(&self, item: &CatalogItem, requested: u32) -> Result<()> {
        if !item.requires_stock() {
            return Ok(());
        }
        let available = self.store.count_unsold(item.product_id(), item.variant_id()).await?;
        if available < requested as i64 {
            return Err(StorefrontError::InsufficientStock {
                product_id: item.product_id(),
                requested: requested as i64,
                available,
            });
        }
        Ok(())
    }

    /// Delivers one unit onto `line_id`. Unlimited variants reuse a template
    /// record and never consume it; everything else consumes exactly one
    /// unsold record. `None` means the line already holds its quantity.
    pub async fn allocate_into(&self, line_id: Uuid, item: &CatalogItem) -> Result<Option<DeliveredUnit>> {
        let (product_id, variant_id) = (item.product_id(), item.variant_id());
        let source = if item.is_unlimited() {
            let template = self.store.template_record(product_id, variant_id).await?
                .ok_or(StorefrontError::NoMatchingInventory { product_id, variant_id })?;
            debug!(%product_id, ?variant_id, template_id = %template.id, "unlimited template used");
            UnitSource::Shared { payload: template.payload }
        } else {
            UnitSource::Stock { product_id, variant_id }
        };
        match self.store.deliver_unit(line_id, &source, Utc::now()).await? {
            LineDelivery::Attached(unit) => {
                debug!(%line_id, %product_id, record_id = ?unit.record_id, "unit delivered");
                Ok(Some(unit))
            }
            LineDelivery::LineFull => Ok(None),
            LineDelivery::OutOfStock => Err(StorefrontError::NoMatchingInventory { product_id, variant_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{InventoryRecord, OrderLine, Product, ProductType, ProductVariant};
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn product() -> Product {
        Product { id: Uuid::new_v4(), name: "Mail account".into(), price: dec!(3), product_type: ProductType::Account,
                  is_active: true, sales_count: 0, warranty_days: None, created_at: Utc::now() }
    }

    fn record(p: &Product, variant_id: Option<Uuid>, payload: &str) -> InventoryRecord {
        InventoryRecord { id: Uuid::new_v4(), product_id: p.id, variant_id, payload: payload.into(), is_sold: false, sold_at: None }
    }

    async fn open_line(store: &MemoryStore, p: &Product, variant_id: Option<Uuid>, quantity: i32) -> OrderLine {
        let line = OrderLine {
            id: Uuid::new_v4(), order_id: Uuid::new_v4(), product_id: p.id, variant_id, product_type: p.product_type,
            quantity, unit_price: p.price, flash_sale_id: None, deliveries: vec![], fulfilled_at: None,
        };
        store.insert_order_line(&line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_stock_check_reports_available() {
        let store = MemoryStore::new();
        let p = product();
        store.insert_record(record(&p, None, "a")).await;
        let item = CatalogItem::new(p, None).unwrap();
        let alloc = InventoryAllocator::new(&store);
        alloc.ensure_stock(&item, 1).await.unwrap();
        match alloc.ensure_stock(&item, 2).await {
            Err(StorefrontError::InsufficientStock { requested, available, .. }) => {
                assert_eq!((requested, available), (2, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allocation_consumes_and_then_runs_dry() {
        let store = MemoryStore::new();
        let p = product();
        let r = record(&p, None, "user:pass");
        store.insert_record(r.clone()).await;
        let line = open_line(&store, &p, None, 2).await;
        let item = CatalogItem::new(p, None).unwrap();
        let alloc = InventoryAllocator::new(&store);

        let unit = alloc.allocate_into(line.id, &item).await.unwrap().unwrap();
        assert_eq!(unit.record_id, Some(r.id));
        assert!(store.record(r.id).await.unwrap().is_sold);
        assert!(matches!(alloc.allocate_into(line.id, &item).await, Err(StorefrontError::NoMatchingInventory { .. })));
        assert_eq!(store.order_lines(line.order_id).await.unwrap()[0].deliveries.len(), 1);
    }

    #[tokio::test]
    async fn test_full_line_consumes_nothing() {
        let store = MemoryStore::new();
        let p = product();
        for i in 0..3 {
            store.insert_record(record(&p, None, &format!("acct-{i}"))).await;
        }
        let line = open_line(&store, &p, None, 1).await;
        let item = CatalogItem::new(p.clone(), None).unwrap();
        let alloc = InventoryAllocator::new(&store);

        assert!(alloc.allocate_into(line.id, &item).await.unwrap().is_some());
        assert_eq!(alloc.allocate_into(line.id, &item).await.unwrap(), None);
        assert_eq!(store.count_unsold(p.id, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unlimited_variant_reuses_template() {
        let store = MemoryStore::new();
        let p = product();
        let v = ProductVariant { id: Uuid::new_v4(), product_id: p.id, name: "Shared".into(), price: dec!(1),
                                 is_unlimited: true, is_active: true, warranty_days: None };
        let r = record(&p, Some(v.id), "shared-login");
        store.insert_record(r.clone()).await;
        let line = open_line(&store, &p, Some(v.id), 3).await;
        let item = CatalogItem::new(p, Some(v)).unwrap();
        let alloc = InventoryAllocator::new(&store);

        alloc.ensure_stock(&item, 50).await.unwrap();
        for _ in 0..3 {
            let unit = alloc.allocate_into(line.id, &item).await.unwrap().unwrap();
            assert_eq!(unit.record_id, None);
            assert_eq!(unit.payload, "shared-login");
        }
        assert!(!store.record(r.id).await.unwrap().is_sold);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_never_share_a_record() {
        let store = Arc::new(MemoryStore::new());
        let p = product();
        for i in 0..5 {
            store.insert_record(record(&p, None, &format!("acct-{i}"))).await;
        }
        let line_id = open_line(&store, &p, None, 8).await.id;
        let item = CatalogItem::new(p, None).unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let item = item.clone();
            handles.push(tokio::spawn(async move {
                InventoryAllocator::new(store.as_ref()).allocate_into(line_id, &item).await.ok().flatten()
            }));
        }
        let mut ids = HashSet::new();
        let mut granted = 0;
        for h in handles {
            if let Some(unit) = h.await.unwrap() {
                granted += 1;
                assert!(ids.insert(unit.record_id.unwrap()));
            }
        }
        assert_eq!(granted, 5);
    }
}
