//! Order Builder: cart or top-up request in, persisted order out.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CatalogItem};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::events::EventPublisher;
use crate::fulfillment::{FulfillmentEngine, FulfillmentReport};
use crate::inventory::InventoryAllocator;
use crate::pricing::{self, PriceQuote};
use crate::store::Store;
use crate::wallet::WalletLedger;
use crate::{
    CancelReason, Money, Order, OrderLine, OrderNumber, OrderState, PaymentMethod, Result, StorefrontError,
    TransactionKind,
};

pub const ORDER_NUMBER_ATTEMPTS: usize = 5;
pub const LINE_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct OrderPolicy {
    pub min_topup: Money,
    pub default_warranty_days: i64,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self { min_topup: Money::new(Decimal::ONE), default_warranty_days: 7 }
    }
}

#[derive(Clone, Debug)]
pub enum Checkout {
    Cart { cart: Cart, payment_method: PaymentMethod },
    Topup { amount: Money },
}

#[derive(Clone, Debug, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    /// Present for wallet-paid carts, which are fulfilled synchronously.
    pub fulfillment: Option<FulfillmentReport>,
}

struct PricedLine {
    item: CatalogItem,
    quantity: u32,
    quote: PriceQuote,
}

pub struct OrderBuilder<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
    policy: OrderPolicy,
}

impl<'a> OrderBuilder<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher, policy: OrderPolicy) -> Self {
        Self { store, events, policy }
    }

    pub async fn place(&self, user_id: Uuid, checkout: Checkout) -> Result<PlacedOrder> {
        match checkout {
            Checkout::Topup { amount } => self.place_topup(user_id, amount).await,
            Checkout::Cart { cart, payment_method } => self.place_cart(user_id, &cart, payment_method).await,
        }
    }

    /// Funds arrive later through reconciliation, never here.
    async fn place_topup(&self, user_id: Uuid, amount: Money) -> Result<PlacedOrder> {
        if amount < self.policy.min_topup {
            return Err(StorefrontError::TopupBelowMinimum { minimum: self.policy.min_topup.amount() });
        }
        let order = self.persist_order(user_id, amount, PaymentMethod::WalletTopup).await?;
        info!(order_id = %order.id, %user_id, amount = %amount, "top-up order created");
        self.announce(&order).await;
        Ok(PlacedOrder { order, lines: Vec::new(), fulfillment: None })
    }

    async fn place_cart(&self, user_id: Uuid, cart: &Cart, payment_method: PaymentMethod) -> Result<PlacedOrder> {
        if payment_method == PaymentMethod::WalletTopup {
            return Err(StorefrontError::InvalidRequest("wallet_topup orders carry an amount, not items".into()));
        }
        if cart.is_empty() {
            return Err(StorefrontError::EmptyCart);
        }

        let priced = self.price_cart(cart).await?;
        let total: Money = priced.iter().map(|l| l.quote.unit_price.multiply(l.quantity)).sum();

        let ledger = WalletLedger::new(self.store, self.events);
        if payment_method == PaymentMethod::Wallet {
            let available = ledger.balance(user_id).await?;
            if available < total {
                return Err(StorefrontError::InsufficientBalance { required: total.amount(), available: available.amount() });
            }
        }

        let order = self.persist_order(user_id, total, payment_method.clone()).await?;
        let lines = match self.persist_lines(&order, &priced).await {
            Ok(lines) => lines,
            Err(e) => {
                self.cancel(&order, CancelReason::LinesIncomplete).await;
                return Err(e);
            }
        };
        info!(order_id = %order.id, %user_id, total = %total, lines = lines.len(), method = %payment_method, "order created");
        self.announce(&order).await;

        if payment_method != PaymentMethod::Wallet {
            return Ok(PlacedOrder { order, lines, fulfillment: None });
        }

        if total.is_positive() {
            let debit = ledger
                .debit(user_id, total, TransactionKind::Purchase, Some(order.id), format!("Order {}", order.order_number))
                .await;
            if let Err(e) = debit {
                let reason = match e {
                    StorefrontError::InsufficientBalance { .. } => CancelReason::InsufficientBalance,
                    _ => CancelReason::PaymentFailed,
                };
                self.cancel(&order, reason).await;
                return Err(e);
            }
        }
        let paid = order.state.transition(OrderState::Processing)?;
        if !self.store.transition_order(order.id, order.state, paid, None).await? {
            return Err(StorefrontError::Conflict(format!("order {} changed during checkout", order.id)));
        }
        self.events
            .publish(DomainEvent::Order(OrderEvent::Paid { order_id: order.id, provider: PaymentMethod::Wallet.to_string() }))
            .await;

        let report = FulfillmentEngine::new(self.store, self.events, self.policy.default_warranty_days)
            .fulfill(order.id)
            .await?;
        let order = self.store.order(order.id).await?.ok_or(StorefrontError::OrderNotFound)?;
        let lines = self.store.order_lines(order.id).await?;
        Ok(PlacedOrder { order, lines, fulfillment: Some(report) })
    }

    /// Resolves, prices and stock-checks every line before anything is written.
    async fn price_cart(&self, cart: &Cart) -> Result<Vec<PricedLine>> {
        let now = Utc::now();
        let allocator = InventoryAllocator::new(self.store);
        let mut priced = Vec::with_capacity(cart.lines().len());
        for line in cart.lines() {
            let product = self.store.product(line.product_id).await?
                .ok_or(StorefrontError::ProductNotFound(line.product_id))?;
            let variant = match line.variant_id {
                Some(id) => Some(self.store.variant(id).await?.ok_or(StorefrontError::VariantNotFound(id))?),
                None => None,
            };
            let item = CatalogItem::new(product, variant)?;
            let quantity = line.quantity.value();
            let quote = pricing::resolve(self.store, &item, quantity, now).await?;
            allocator.ensure_stock(&item, quantity).await?;
            priced.push(PricedLine { item, quantity, quote });
        }
        Ok(priced)
    }

    async fn persist_order(&self, user_id: Uuid, total: Money, method: PaymentMethod) -> Result<Order> {
        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            let number = OrderNumber::generate(Utc::now());
            let order = Order::create(user_id, number.into_string(), total, method.clone());
            match self.store.insert_order(&order).await {
                Ok(()) => return Ok(order),
                Err(StorefrontError::Conflict(msg)) => {
                    warn!(attempt, order_number = %order.order_number, %msg, "order number collision");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorefrontError::OrderNumberCollision)
    }

    async fn persist_lines(&self, order: &Order, priced: &[PricedLine]) -> Result<Vec<OrderLine>> {
        let mut lines = Vec::with_capacity(priced.len());
        for p in priced {
            let line = OrderLine {
                id: Uuid::now_v7(),
                order_id: order.id,
                product_id: p.item.product_id(),
                variant_id: p.item.variant_id(),
                product_type: p.item.product_type(),
                quantity: p.quantity as i32,
                unit_price: p.quote.unit_price.amount(),
                flash_sale_id: p.quote.flash_sale_id,
                deliveries: Vec::new(),
                fulfilled_at: None,
            };
            let mut last_err = None;
            for attempt in 1..=LINE_INSERT_ATTEMPTS {
                match self.store.insert_order_line(&line).await {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        warn!(order_id = %order.id, line_id = %line.id, attempt, error = %e, "line insert failed");
                        last_err = Some(e);
                    }
                }
            }
            if let Some(e) = last_err {
                return Err(e);
            }
            lines.push(line);
        }
        Ok(lines)
    }

    async fn cancel(&self, order: &Order, reason: CancelReason) {
        let to = OrderState::Cancelled(reason);
        match self.store.transition_order(order.id, order.state, to, None).await {
            Ok(true) => {
                warn!(order_id = %order.id, ?reason, "order cancelled during checkout");
                self.events.publish(DomainEvent::Order(OrderEvent::Cancelled { order_id: order.id, reason })).await;
            }
            Ok(false) => warn!(order_id = %order.id, ?reason, "order moved before it could be cancelled"),
            Err(e) => error!(order_id = %order.id, ?reason, error = %e, "failed to cancel order"),
        }
    }

    async fn announce(&self, order: &Order) {
        self.events
            .publish(DomainEvent::Order(OrderEvent::Created { order_id: order.id, user_id: order.user_id, total: order.total }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{FlashSale, InventoryRecord, PaymentProgress, Product, ProductType, ProductVariant};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: MemoryStore,
        events: EventPublisher,
        user: Uuid,
    }

    impl Fixture {
        fn new() -> Self { Self { store: MemoryStore::new(), events: EventPublisher::default(), user: Uuid::new_v4() } }

        fn builder(&self) -> OrderBuilder<'_> { OrderBuilder::new(&self.store, &self.events, OrderPolicy::default()) }

        async fn product(&self, kind: ProductType, price: Decimal, stock: usize) -> Product {
            let p = Product { id: Uuid::new_v4(), name: "P1".into(), price, product_type: kind, is_active: true,
                              sales_count: 0, warranty_days: None, created_at: Utc::now() };
            self.store.insert_product(p.clone()).await;
            for i in 0..stock {
                self.store.insert_record(InventoryRecord { id: Uuid::new_v4(), product_id: p.id, variant_id: None,
                                                           payload: format!("acct-{i}"), is_sold: false, sold_at: None }).await;
            }
            p
        }

        async fn fund(&self, amount: Decimal) {
            WalletLedger::new(&self.store, &self.events)
                .credit(self.user, Money::new(amount), TransactionKind::Deposit, None, "seed")
                .await
                .unwrap();
        }

        fn cart(&self, product_id: Uuid, variant_id: Option<Uuid>, qty: i64, method: PaymentMethod) -> Checkout {
            Checkout::Cart { cart: Cart::from_items([(product_id, variant_id, qty)]).unwrap(), payment_method: method }
        }
    }

    #[tokio::test]
    async fn test_wallet_purchase_debits_and_delivers() {
        let fx = Fixture::new();
        let p1 = fx.product(ProductType::Account, dec!(10), 2).await;
        fx.fund(dec!(25)).await;

        let placed = fx.builder().place(fx.user, fx.cart(p1.id, None, 2, PaymentMethod::Wallet)).await.unwrap();
        assert_eq!(placed.order.total, dec!(20));
        assert_eq!(placed.order.state, OrderState::Completed);
        assert!(placed.fulfillment.unwrap().completed);

        let ledger = WalletLedger::new(&fx.store, &fx.events);
        assert_eq!(ledger.balance(fx.user).await.unwrap().amount(), dec!(5));
        assert_eq!(fx.store.count_unsold(p1.id, None).await.unwrap(), 0);
        assert!(placed.lines[0].delivered_payload().is_some());
    }

    #[tokio::test]
    async fn test_short_wallet_persists_nothing() {
        let fx = Fixture::new();
        let p1 = fx.product(ProductType::Account, dec!(10), 2).await;
        fx.fund(dec!(15)).await;

        let err = fx.builder().place(fx.user, fx.cart(p1.id, None, 2, PaymentMethod::Wallet)).await.unwrap_err();
        match err {
            StorefrontError::InsufficientBalance { required, available } => {
                assert_eq!((required, available), (dec!(20), dec!(15)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.store.order_count().await, 0);
        assert_eq!(fx.store.count_unsold(p1.id, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_stock_rejected_upfront() {
        let fx = Fixture::new();
        let p1 = fx.product(ProductType::Account, dec!(10), 0).await;
        fx.fund(dec!(100)).await;

        let err = fx.builder().place(fx.user, fx.cart(p1.id, None, 1, PaymentMethod::Wallet)).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InsufficientStock { available: 0, requested: 1, .. }));
        assert_eq!(fx.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_external_payment_leaves_order_pending() {
        let fx = Fixture::new();
        let p1 = fx.product(ProductType::Service, dec!(9.99), 0).await;
        let placed = fx.builder()
            .place(fx.user, fx.cart(p1.id, None, 3, PaymentMethod::External("nowpayments".into())))
            .await
            .unwrap();
        assert_eq!(placed.order.state, OrderState::Pending(PaymentProgress::Unpaid));
        assert_eq!(placed.order.total, dec!(29.97));
        assert_eq!(placed.lines.len(), 1);
        assert!(placed.order.order_number.starts_with("ORD-"));
        assert!(placed.fulfillment.is_none());
    }

    #[tokio::test]
    async fn test_flash_price_frozen_on_line() {
        let fx = Fixture::new();
        let p1 = fx.product(ProductType::Account, dec!(10), 3).await;
        let v1 = ProductVariant { id: Uuid::new_v4(), product_id: p1.id, name: "V1".into(), price: dec!(8),
                                  is_unlimited: false, is_active: true, warranty_days: None };
        fx.store.insert_variant(v1.clone()).await;
        for _ in 0..3 {
            fx.store.insert_record(InventoryRecord { id: Uuid::new_v4(), product_id: p1.id, variant_id: Some(v1.id),
                                                     payload: "v".into(), is_sold: false, sold_at: None }).await;
        }
        let sale = FlashSale { id: Uuid::new_v4(), product_id: p1.id, variant_id: Some(v1.id), sale_price: dec!(5),
                               starts_at: Utc::now() - Duration::minutes(5), ends_at: Utc::now() + Duration::minutes(5),
                               is_active: true, max_quantity: Some(3), sold_quantity: 2 };
        fx.store.insert_flash_sale(sale.clone()).await;

        let method = PaymentMethod::External("paypal".into());
        let over_cap = fx.builder().place(fx.user, fx.cart(p1.id, Some(v1.id), 2, method.clone())).await.unwrap();
        assert_eq!(over_cap.lines[0].unit_price, dec!(8));
        assert_eq!(over_cap.lines[0].flash_sale_id, None);

        let within = fx.builder().place(fx.user, fx.cart(p1.id, Some(v1.id), 1, method)).await.unwrap();
        assert_eq!(within.lines[0].unit_price, dec!(5));
        assert_eq!(within.lines[0].flash_sale_id, Some(sale.id));
    }

    #[tokio::test]
    async fn test_topup_minimum_and_shape() {
        let fx = Fixture::new();
        let err = fx.builder().place(fx.user, Checkout::Topup { amount: Money::new(dec!(0.50)) }).await.unwrap_err();
        assert!(matches!(err, StorefrontError::TopupBelowMinimum { .. }));

        let placed = fx.builder().place(fx.user, Checkout::Topup { amount: Money::new(dec!(20)) }).await.unwrap();
        assert!(placed.order.is_topup());
        assert!(placed.lines.is_empty());
        assert_eq!(placed.order.state, OrderState::NEW);
        let ledger = WalletLedger::new(&fx.store, &fx.events);
        assert_eq!(ledger.balance(fx.user).await.unwrap(), Money::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_products_rejected() {
        let fx = Fixture::new();
        let method = PaymentMethod::External("oxapay".into());
        let missing = Uuid::new_v4();
        let err = fx.builder().place(fx.user, fx.cart(missing, None, 1, method.clone())).await.unwrap_err();
        assert!(matches!(err, StorefrontError::ProductNotFound(id) if id == missing));

        let mut p = fx.product(ProductType::Code, dec!(1), 0).await;
        p.is_active = false;
        fx.store.insert_product(p.clone()).await;
        let err = fx.builder().place(fx.user, fx.cart(p.id, None, 1, method)).await.unwrap_err();
        assert!(matches!(err, StorefrontError::ProductInactive(_)));
        assert_eq!(fx.store.order_count().await, 0);
    }
}
