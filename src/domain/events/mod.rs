//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::CancelReason;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Wallet(WalletEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, user_id: Uuid, total: Decimal },
    Paid { order_id: Uuid, provider: String },
    LineDelivered { order_id: Uuid, line_id: Uuid, units: usize },
    Completed { order_id: Uuid },
    Parked { order_id: Uuid, missing_lines: usize },
    Cancelled { order_id: Uuid, reason: CancelReason },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    Credited { user_id: Uuid, amount: Decimal, order_id: Option<Uuid> },
    Debited { user_id: Uuid, amount: Decimal, order_id: Option<Uuid> },
}

impl DomainEvent {
    /// NATS subject suffix, e.g. `order.completed`.
    pub fn subject(&self) -> String {
        match self {
            Self::Order(e) => format!("order.{}", match e {
                OrderEvent::Created { .. } => "created",
                OrderEvent::Paid { .. } => "paid",
                OrderEvent::LineDelivered { .. } => "line_delivered",
                OrderEvent::Completed { .. } => "completed",
                OrderEvent::Parked { .. } => "parked",
                OrderEvent::Cancelled { .. } => "cancelled",
            }),
            Self::Wallet(e) => format!("wallet.{}", match e {
                WalletEvent::Credited { .. } => "credited",
                WalletEvent::Debited { .. } => "debited",
            }),
        }
    }
}
