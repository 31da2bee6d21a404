//! Fulfillment Engine.
//!
//! Runs on an order already in `Processing`. Each inventory-bearing line is
//! topped up to its quantity, one allocated unit at a time; lines that are
//! already complete are never touched again. The order is completed only
//! when every line is delivered; otherwise it stays `Processing` and the
//! engine can be re-run later.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::CatalogItem;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::events::EventPublisher;
use crate::inventory::InventoryAllocator;
use crate::store::Store;
use crate::{OrderLine, OrderState, Result, StorefrontError};

#[derive(Clone, Debug, Default, Serialize)]
pub struct FulfillmentReport {
    pub order_id: Uuid,
    pub completed: bool,
    /// Units delivered during this run.
    pub delivered_units: usize,
    /// Lines still short of inventory.
    pub pending_lines: Vec<Uuid>,
    pub warranty_expires_at: Option<DateTime<Utc>>,
}

pub struct FulfillmentEngine<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
    default_warranty_days: i64,
}

impl<'a> FulfillmentEngine<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher, default_warranty_days: i64) -> Self {
        Self { store, events, default_warranty_days }
    }

    pub async fn fulfill(&self, order_id: Uuid) -> Result<FulfillmentReport> {
        let order = self.store.order(order_id).await?.ok_or(StorefrontError::OrderNotFound)?;
        match order.state {
            OrderState::Processing => {}
            OrderState::Completed => {
                info!(%order_id, "order already completed, nothing to fulfill");
                return Ok(FulfillmentReport {
                    order_id,
                    completed: true,
                    warranty_expires_at: order.warranty_expires_at,
                    ..Default::default()
                });
            }
            other => {
                return Err(StorefrontError::InvalidTransition {
                    from: other.to_string(),
                    to: OrderState::Completed.to_string(),
                })
            }
        }

        let lines = self.store.order_lines(order_id).await?;
        let mut report = FulfillmentReport { order_id, ..Default::default() };
        let mut warranty_days = 0i64;

        for line in &lines {
            let item = match self.catalog_item(line).await {
                Ok(item) => item,
                Err(e) => {
                    error!(%order_id, line_id = %line.id, error = %e, "cannot load catalog entry for line");
                    report.pending_lines.push(line.id);
                    continue;
                }
            };
            warranty_days = warranty_days.max(item.warranty_days().map(i64::from).unwrap_or(self.default_warranty_days));

            let (delivered, full) = self.deliver_line(line, &item).await;
            report.delivered_units += delivered;
            if delivered > 0 {
                self.events
                    .publish(DomainEvent::Order(OrderEvent::LineDelivered { order_id, line_id: line.id, units: delivered }))
                    .await;
            }
            if !full {
                report.pending_lines.push(line.id);
                continue;
            }
            self.count_sale(line).await?;
        }

        if !report.pending_lines.is_empty() {
            warn!(%order_id, pending = report.pending_lines.len(), "order parked in processing");
            self.events
                .publish(DomainEvent::Order(OrderEvent::Parked { order_id, missing_lines: report.pending_lines.len() }))
                .await;
            return Ok(report);
        }

        if lines.is_empty() {
            warranty_days = self.default_warranty_days;
        }
        let expires = Utc::now() + Duration::days(warranty_days);
        if self.store.transition_order(order_id, OrderState::Processing, OrderState::Completed, Some(expires)).await? {
            info!(%order_id, warranty_expires_at = %expires, "order completed");
            self.events.publish(DomainEvent::Order(OrderEvent::Completed { order_id })).await;
            report.warranty_expires_at = Some(expires);
        } else {
            let current = self.store.order(order_id).await?.ok_or(StorefrontError::OrderNotFound)?;
            info!(%order_id, state = %current.state, "order completed concurrently");
            report.warranty_expires_at = current.warranty_expires_at;
        }
        report.completed = true;
        Ok(report)
    }

    /// Products may be deactivated after purchase; delivery still honours the line.
    async fn catalog_item(&self, line: &OrderLine) -> Result<CatalogItem> {
        let product = self.store.product(line.product_id).await?
            .ok_or(StorefrontError::ProductNotFound(line.product_id))?;
        let variant = match line.variant_id {
            Some(id) => Some(self.store.variant(id).await?.ok_or(StorefrontError::VariantNotFound(id))?),
            None => None,
        };
        Ok(CatalogItem { product, variant })
    }

    /// Tops the line up to its quantity. Returns the units this run attached
    /// and whether the line is now full; a concurrent run may fill it first.
    async fn deliver_line(&self, line: &OrderLine, item: &CatalogItem) -> (usize, bool) {
        let allocator = InventoryAllocator::new(self.store);
        let mut delivered = 0;
        for _ in 0..line.missing_units() {
            match allocator.allocate_into(line.id, item).await {
                Ok(Some(_)) => delivered += 1,
                Ok(None) => return (delivered, true),
                Err(StorefrontError::NoMatchingInventory { .. }) => {
                    warn!(order_id = %line.order_id, line_id = %line.id, product_id = %line.product_id, "out of inventory");
                    return (delivered, false);
                }
                Err(e) => {
                    error!(order_id = %line.order_id, line_id = %line.id, error = %e, "delivery failed");
                    return (delivered, false);
                }
            }
        }
        (delivered, true)
    }

    /// Bumps sales and flash-sale counters by the line quantity, once per line.
    async fn count_sale(&self, line: &OrderLine) -> Result<()> {
        if !self.store.mark_line_fulfilled(line.id, Utc::now()).await? {
            return Ok(());
        }
        self.store.add_product_sales(line.product_id, line.quantity).await?;
        let Some(sale_id) = line.flash_sale_id else { return Ok(()) };
        if let Some(sale) = self.store.add_flash_sale_sold(sale_id, line.quantity).await? {
            if let Some(max) = sale.max_quantity.filter(|max| sale.sold_quantity > *max) {
                warn!(%sale_id, sold = sale.sold_quantity, max, "flash sale oversold");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{testing::YieldingStore, MemoryStore};
    use crate::{
        FlashSale, InventoryRecord, Money, Order, PaymentMethod, PaymentProgress, Product, ProductType, ProductVariant,
    };
    use rust_decimal_macros::dec;

    struct Fixture {
        store: MemoryStore,
        events: EventPublisher,
    }

    impl Fixture {
        fn new() -> Self { Self { store: MemoryStore::new(), events: EventPublisher::default() } }

        fn engine(&self) -> FulfillmentEngine<'_> { FulfillmentEngine::new(&self.store, &self.events, 7) }

        async fn product(&self, kind: ProductType, warranty_days: Option<i32>) -> Product {
            let p = Product { id: Uuid::new_v4(), name: "Item".into(), price: dec!(10), product_type: kind,
                              is_active: true, sales_count: 0, warranty_days, created_at: Utc::now() };
            self.store.insert_product(p.clone()).await;
            p
        }

        async fn stock(&self, p: &Product, variant_id: Option<Uuid>, n: usize) {
            for i in 0..n {
                self.store.insert_record(InventoryRecord {
                    id: Uuid::new_v4(), product_id: p.id, variant_id, payload: format!("login-{i}"),
                    is_sold: false, sold_at: None,
                }).await;
            }
        }

        async fn processing_order(&self, lines: &[(&Product, Option<Uuid>, i32, Option<Uuid>)]) -> (Order, Vec<OrderLine>) {
            let mut order = Order::create(Uuid::new_v4(), format!("ORD-TEST-{}", Uuid::new_v4()), Money::new(dec!(10)),
                                          PaymentMethod::External("paypal".into()));
            order.state = OrderState::Processing;
            self.store.insert_order(&order).await.unwrap();
            let mut out = Vec::new();
            for (p, variant_id, quantity, flash_sale_id) in lines {
                let line = OrderLine {
                    id: Uuid::new_v4(), order_id: order.id, product_id: p.id, variant_id: *variant_id,
                    product_type: p.product_type, quantity: *quantity, unit_price: p.price,
                    flash_sale_id: *flash_sale_id, deliveries: vec![], fulfilled_at: None,
                };
                self.store.insert_order_line(&line).await.unwrap();
                out.push(line);
            }
            (order, out)
        }
    }

    #[tokio::test]
    async fn test_completes_when_every_line_delivered() {
        let fx = Fixture::new();
        let account = fx.product(ProductType::Account, Some(30)).await;
        let service = fx.product(ProductType::Service, None).await;
        fx.stock(&account, None, 2).await;
        let (order, _) = fx.processing_order(&[(&account, None, 2, None), (&service, None, 1, None)]).await;

        let report = fx.engine().fulfill(order.id).await.unwrap();
        assert!(report.completed);
        assert_eq!(report.delivered_units, 2);

        let stored = fx.store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.state, OrderState::Completed);
        let expires = stored.warranty_expires_at.unwrap();
        assert!(expires > Utc::now() + Duration::days(29));

        let lines = fx.store.order_lines(order.id).await.unwrap();
        let acct_line = lines.iter().find(|l| l.product_id == account.id).unwrap();
        assert_eq!(acct_line.delivered_payload().unwrap().lines().count(), 2);
        assert_eq!(fx.store.product(account.id).await.unwrap().unwrap().sales_count, 2);
        assert_eq!(fx.store.product(service.id).await.unwrap().unwrap().sales_count, 1);
    }

    #[tokio::test]
    async fn test_parks_and_resumes_without_redelivery() {
        let fx = Fixture::new();
        let account = fx.product(ProductType::Account, None).await;
        fx.stock(&account, None, 1).await;
        let (order, _) = fx.processing_order(&[(&account, None, 2, None)]).await;

        let first = fx.engine().fulfill(order.id).await.unwrap();
        assert!(!first.completed);
        assert_eq!(first.delivered_units, 1);
        assert_eq!(fx.store.order(order.id).await.unwrap().unwrap().state, OrderState::Processing);
        assert_eq!(fx.store.product(account.id).await.unwrap().unwrap().sales_count, 0);

        fx.stock(&account, None, 3).await;
        let second = fx.engine().fulfill(order.id).await.unwrap();
        assert!(second.completed);
        assert_eq!(second.delivered_units, 1);
        let line = &fx.store.order_lines(order.id).await.unwrap()[0];
        assert_eq!(line.deliveries.len(), 2);
        assert_eq!(fx.store.count_unsold(account.id, None).await.unwrap(), 2);
        assert_eq!(fx.store.product(account.id).await.unwrap().unwrap().sales_count, 2);

        // A re-run on a completed order changes nothing.
        let third = fx.engine().fulfill(order.id).await.unwrap();
        assert!(third.completed);
        assert_eq!(third.delivered_units, 0);
        assert_eq!(fx.store.count_unsold(account.id, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_runs_deliver_each_unit_once() {
        let fx = Fixture::new();
        let account = fx.product(ProductType::Account, None).await;
        fx.stock(&account, None, 4).await;
        let (order, _) = fx.processing_order(&[(&account, None, 2, None)]).await;

        let store = YieldingStore::new(fx.store.clone());
        let first = FulfillmentEngine::new(&store, &fx.events, 7);
        let second = FulfillmentEngine::new(&store, &fx.events, 7);
        let (a, b) = tokio::join!(first.fulfill(order.id), second.fulfill(order.id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.completed && b.completed);
        assert_eq!(a.delivered_units + b.delivered_units, 2);
        let line = &fx.store.order_lines(order.id).await.unwrap()[0];
        assert_eq!(line.deliveries.len(), 2);
        assert_eq!(fx.store.count_unsold(account.id, None).await.unwrap(), 2);
        assert_eq!(fx.store.product(account.id).await.unwrap().unwrap().sales_count, 2);
        assert_eq!(fx.store.order(order.id).await.unwrap().unwrap().state, OrderState::Completed);
    }

    #[tokio::test]
    async fn test_flash_sale_counter_uses_line_quantity() {
        let fx = Fixture::new();
        let account = fx.product(ProductType::Account, None).await;
        let variant = ProductVariant { id: Uuid::new_v4(), product_id: account.id, name: "Shared".into(), price: dec!(4),
                                       is_unlimited: true, is_active: true, warranty_days: Some(3) };
        fx.store.insert_variant(variant.clone()).await;
        fx.stock(&account, Some(variant.id), 1).await;
        let sale = FlashSale { id: Uuid::new_v4(), product_id: account.id, variant_id: Some(variant.id), sale_price: dec!(2),
                               starts_at: Utc::now() - Duration::hours(1), ends_at: Utc::now() + Duration::hours(1),
                               is_active: true, max_quantity: Some(10), sold_quantity: 1 };
        fx.store.insert_flash_sale(sale.clone()).await;
        let (order, _) = fx.processing_order(&[(&account, Some(variant.id), 3, Some(sale.id))]).await;

        let report = fx.engine().fulfill(order.id).await.unwrap();
        assert!(report.completed);
        assert_eq!(fx.store.flash_sale(sale.id).await.unwrap().sold_quantity, 4);
        assert_eq!(fx.store.count_unsold(account.id, Some(variant.id)).await.unwrap(), 1);
        let expires = report.warranty_expires_at.unwrap();
        assert!(expires < Utc::now() + Duration::days(4));
    }

    #[tokio::test]
    async fn test_rejects_orders_not_yet_paid() {
        let fx = Fixture::new();
        let service = fx.product(ProductType::Service, None).await;
        let (mut order, _) = fx.processing_order(&[(&service, None, 1, None)]).await;
        order.state = OrderState::Pending(PaymentProgress::Unpaid);
        let unpaid = Order { id: Uuid::new_v4(), order_number: "ORD-UNPAID".into(), ..order };
        fx.store.insert_order(&unpaid).await.unwrap();
        assert!(matches!(fx.engine().fulfill(unpaid.id).await, Err(StorefrontError::InvalidTransition { .. })));
        assert!(matches!(fx.engine().fulfill(Uuid::new_v4()).await, Err(StorefrontError::OrderNotFound)));
    }
}
