//! Expiry Sweeper: cancels orders nobody paid for within the timeout.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::events::EventPublisher;
use crate::store::Store;
use crate::{CancelReason, OrderState, Result};

#[derive(Clone, Debug, Serialize)]
pub struct SweepFailure {
    pub order_id: Uuid,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub cancelled_count: usize,
    pub cancelled_orders: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SweepFailure>,
}

/// One pass. Per-order failures are collected, never abort the sweep.
pub async fn sweep(store: &dyn Store, events: &EventPublisher, timeout: Duration, now: DateTime<Utc>) -> Result<SweepReport> {
    let cutoff = now - timeout;
    let stale = store.stale_unpaid_orders(cutoff).await?;
    let mut report = SweepReport::default();
    let expired = OrderState::Cancelled(CancelReason::Expired);

    for order in stale {
        if !order.state.is_unpaid() {
            continue;
        }
        match store.transition_order(order.id, order.state, expired, None).await {
            Ok(true) => {
                events
                    .publish(DomainEvent::Order(OrderEvent::Cancelled { order_id: order.id, reason: CancelReason::Expired }))
                    .await;
                report.cancelled_orders.push(order.order_number);
            }
            // Paid or progressed since it was read.
            Ok(false) => {}
            Err(e) => {
                error!(order_id = %order.id, error = %e, "failed to expire order");
                report.errors.push(SweepFailure { order_id: order.id, error: e.to_string() });
            }
        }
    }
    report.cancelled_count = report.cancelled_orders.len();
    info!(cancelled = report.cancelled_count, failed = report.errors.len(), %cutoff, "expiry sweep finished");
    Ok(report)
}

/// Runs [`sweep`] every `interval` until the task is dropped.
pub async fn run_periodic(store: Arc<dyn Store>, events: EventPublisher, timeout: Duration, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep(store.as_ref(), &events, timeout, Utc::now()).await {
            error!(error = %e, "expiry sweep failed");
        }
    }
}
