//! The one reconciliation pipeline: authenticate, extract, map, apply.
//!
//! Every state change is a compare-and-swap, so a replayed or concurrent
//! notification either wins the transition or observes that someone else
//! did. Money moves only for the winner, and the wallet entry itself is
//! idempotent on the order id as a second line of defence.

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Notification, Parsed, PaymentProvider, PaymentStatus, Verification};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::events::EventPublisher;
use crate::fulfillment::{FulfillmentEngine, FulfillmentReport};
use crate::store::Store;
use crate::wallet::WalletLedger;
use crate::{CancelReason, Order, OrderState, Result, StorefrontError, TransactionKind};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Payment accepted; wallet credited or order fulfilled.
    Settled { completed: bool },
    /// A later notification re-drove fulfillment of a paid order.
    Redriven { completed: bool },
    /// Order was already paid or closed; nothing repeated.
    AlreadySettled,
    /// Payment sub-state recorded, no money moved.
    Progressed,
    Cancelled,
    Ignored,
    Unchanged,
}

/// How a payment confirmation reached us; decides the wallet transaction kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Provider,
    Manual,
}

pub struct Reconciler<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
    default_warranty_days: i64,
    accept_unverified: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher, default_warranty_days: i64) -> Self {
        Self { store, events, default_warranty_days, accept_unverified: false }
    }

    /// Lets paid notifications through when the provider skipped verification.
    pub fn accept_unverified(mut self, accept: bool) -> Self {
        self.accept_unverified = accept;
        self
    }

    pub async fn handle(&self, provider: &dyn PaymentProvider, raw: &[u8], headers: &HeaderMap) -> Result<Outcome> {
        let name = provider.name();
        let verification = provider.authenticate(raw, headers).await;
        match verification {
            Verification::Valid => {}
            Verification::Invalid => {
                warn!(provider = name, "webhook signature rejected");
                return Err(StorefrontError::InvalidSignature);
            }
            Verification::Skipped(reason) => warn!(provider = name, reason, "webhook signature not verified"),
        }

        let notification = match provider.parse(raw)? {
            Parsed::Notification(n) => n,
            Parsed::Ignored { event } => {
                info!(provider = name, event = %event, "webhook ignored");
                return Ok(Outcome::Ignored);
            }
        };
        if let Verification::Skipped(reason) = verification {
            if notification.status == PaymentStatus::Paid && !self.accept_unverified {
                warn!(provider = name, reason, order_ref = %notification.order_ref, "unverified payment notification refused");
                return Err(StorefrontError::InvalidSignature);
            }
        }
        let order = self.resolve(&notification.order_ref).await?;
        info!(provider = name, order_id = %order.id, event = %notification.event, status = ?notification.status,
              state = %order.state, "webhook received");
        self.check_amount(provider, &order, &notification);
        self.apply(order, notification.status, name, Source::Provider).await
    }

    /// Settles an order without a provider notification.
    pub async fn confirm_manually(&self, order_id: Uuid) -> Result<Outcome> {
        let order = self.store.order(order_id).await?.ok_or(StorefrontError::OrderNotFound)?;
        info!(%order_id, state = %order.state, "manual payment confirmation");
        self.apply(order, PaymentStatus::Paid, "manual", Source::Manual).await
    }

    async fn resolve(&self, order_ref: &str) -> Result<Order> {
        let found = match Uuid::parse_str(order_ref) {
            Ok(id) => self.store.order(id).await?,
            Err(_) => self.store.order_by_number(order_ref).await?,
        };
        found.ok_or(StorefrontError::OrderNotFound)
    }

    fn check_amount(&self, provider: &dyn PaymentProvider, order: &Order, n: &Notification) {
        let Some(paid) = n.amount else { return };
        let expected = provider.charge_amount(order.total());
        if paid < expected.amount() && n.status == PaymentStatus::Paid {
            warn!(provider = provider.name(), order_id = %order.id, paid = %paid, expected = %expected,
                  original = ?n.original_amount, "paid amount below charge");
        }
    }

    async fn apply(&self, order: Order, status: PaymentStatus, provider: &str, source: Source) -> Result<Outcome> {
        let order_id = order.id;
        match (order.state, status) {
            (OrderState::Completed, _) => {
                info!(%order_id, "order already completed, notification is a no-op");
                Ok(Outcome::AlreadySettled)
            }
            (OrderState::Processing, PaymentStatus::Paid) => {
                let report = self.settle(&order, source).await?;
                Ok(Outcome::Redriven { completed: report.completed })
            }
            (OrderState::Processing, _) => Ok(Outcome::Unchanged),
            (state @ (OrderState::Pending(_) | OrderState::Cancelled(CancelReason::Expired)), PaymentStatus::Paid) => {
                let next = state.transition(OrderState::Processing)?;
                if !self.store.transition_order(order_id, state, next, None).await? {
                    info!(%order_id, "payment already claimed by a concurrent notification");
                    return Ok(Outcome::AlreadySettled);
                }
                if state == OrderState::Cancelled(CancelReason::Expired) {
                    warn!(%order_id, "payment arrived after expiry, reviving order");
                }
                self.events
                    .publish(DomainEvent::Order(OrderEvent::Paid { order_id, provider: provider.to_string() }))
                    .await;
                let report = self.settle(&order, source).await?;
                Ok(Outcome::Settled { completed: report.completed })
            }
            (OrderState::Pending(current), PaymentStatus::Pending(progress)) => {
                if current == progress {
                    return Ok(Outcome::Unchanged);
                }
                let from = OrderState::Pending(current);
                let to = from.transition(OrderState::Pending(progress))?;
                if self.store.transition_order(order_id, from, to, None).await? {
                    info!(%order_id, from = %from, to = %to, "payment progress recorded");
                    Ok(Outcome::Progressed)
                } else {
                    Ok(Outcome::Unchanged)
                }
            }
            (OrderState::Pending(current), PaymentStatus::Failed | PaymentStatus::Expired) => {
                let reason = if status == PaymentStatus::Failed {
                    CancelReason::PaymentFailed
                } else {
                    CancelReason::PaymentExpired
                };
                let from = OrderState::Pending(current);
                let to = from.transition(OrderState::Cancelled(reason))?;
                if !self.store.transition_order(order_id, from, to, None).await? {
                    return Ok(Outcome::Unchanged);
                }
                info!(%order_id, ?reason, "order cancelled by provider");
                self.events.publish(DomainEvent::Order(OrderEvent::Cancelled { order_id, reason })).await;
                Ok(Outcome::Cancelled)
            }
            (OrderState::Cancelled(reason), _) => {
                info!(%order_id, ?reason, ?status, "order closed, notification ignored");
                Ok(if status == PaymentStatus::Paid { Outcome::AlreadySettled } else { Outcome::Unchanged })
            }
        }
    }

    /// Runs once the order is `Processing`: credit a top-up or fulfil the lines.
    async fn settle(&self, order: &Order, source: Source) -> Result<FulfillmentReport> {
        if !order.is_topup() {
            return FulfillmentEngine::new(self.store, self.events, self.default_warranty_days).fulfill(order.id).await;
        }

        let kind = match source {
            Source::Provider => TransactionKind::Topup,
            Source::Manual => TransactionKind::Deposit,
        };
        let ledger = WalletLedger::new(self.store, self.events);
        ledger
            .credit(order.user_id, order.total(), kind, Some(order.id), format!("Top-up {}", order.order_number))
            .await?;
        let completed = self.store.transition_order(order.id, OrderState::Processing, OrderState::Completed, None).await?;
        if completed {
            info!(order_id = %order.id, amount = %order.total(), "top-up completed");
            self.events.publish(DomainEvent::Order(OrderEvent::Completed { order_id: order.id })).await;
        }
        Ok(FulfillmentReport { order_id: order.id, completed: true, ..Default::default() })
    }
}
