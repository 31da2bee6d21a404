//! Order Aggregate
//!
//! The order lifecycle is one tagged state. The two storage columns
//! (`status`, `payment_status`) are derived from it and parsed back into it,
//! so no code path ever writes the pair independently.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Money, PaymentMethod, ProductType, Result, StorefrontError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProgress {
    Unpaid,
    AwaitingPayment,
    Confirming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Reaped by the expiry sweeper.
    Expired,
    /// The provider reported the invoice as expired or cancelled.
    PaymentExpired,
    PaymentFailed,
    InsufficientBalance,
    LinesIncomplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum OrderState {
    Pending(PaymentProgress),
    Processing,
    Completed,
    Cancelled(CancelReason),
}

impl OrderState {
    pub const NEW: OrderState = OrderState::Pending(PaymentProgress::Unpaid);

    /// Storage columns `(status, payment_status)`.
    pub fn columns(&self) -> (&'static str, &'static str) {
        match self {
            Self::Pending(PaymentProgress::Unpaid) => ("pending", "pending"),
            Self::Pending(PaymentProgress::AwaitingPayment) => ("pending", "awaiting_payment"),
            Self::Pending(PaymentProgress::Confirming) => ("pending", "confirming"),
            Self::Processing => ("processing", "paid"),
            Self::Completed => ("completed", "paid"),
            Self::Cancelled(CancelReason::Expired) => ("cancelled", "expired"),
            Self::Cancelled(CancelReason::PaymentExpired) => ("cancelled", "expired"),
            Self::Cancelled(CancelReason::PaymentFailed) => ("cancelled", "failed"),
            Self::Cancelled(CancelReason::InsufficientBalance) => ("cancelled", "cancelled"),
            Self::Cancelled(CancelReason::LinesIncomplete) => ("cancelled", "cancelled"),
        }
    }

    /// Reads the state back from storage. `cancel_reason` disambiguates
    /// cancelled rows that share a `payment_status`.
    pub fn from_columns(status: &str, payment_status: &str, cancel_reason: Option<&str>) -> Result<Self> {
        let state = match (status, payment_status) {
            ("pending", "pending") => Self::Pending(PaymentProgress::Unpaid),
            ("pending", "awaiting_payment") => Self::Pending(PaymentProgress::AwaitingPayment),
            ("pending", "confirming") => Self::Pending(PaymentProgress::Confirming),
            ("processing", _) => Self::Processing,
            ("completed", _) => Self::Completed,
            ("cancelled", _) => Self::Cancelled(match cancel_reason {
                Some("expired") => CancelReason::Expired,
                Some("payment_expired") => CancelReason::PaymentExpired,
                Some("payment_failed") => CancelReason::PaymentFailed,
                Some("insufficient_balance") => CancelReason::InsufficientBalance,
                Some("lines_incomplete") => CancelReason::LinesIncomplete,
                _ if payment_status == "failed" => CancelReason::PaymentFailed,
                _ => CancelReason::Expired,
            }),
            (s, p) => {
                return Err(StorefrontError::StorageError(format!("unknown order state ({s}, {p})")))
            }
        };
        Ok(state)
    }

    pub fn cancel_reason(&self) -> Option<&'static str> {
        match self {
            Self::Cancelled(CancelReason::Expired) => Some("expired"),
            Self::Cancelled(CancelReason::PaymentExpired) => Some("payment_expired"),
            Self::Cancelled(CancelReason::PaymentFailed) => Some("payment_failed"),
            Self::Cancelled(CancelReason::InsufficientBalance) => Some("insufficient_balance"),
            Self::Cancelled(CancelReason::LinesIncomplete) => Some("lines_incomplete"),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (Pending(a), Pending(b)) => a != b,
            (Pending(_), Processing) => true,
            (Pending(_), Cancelled(_)) => true,
            (Processing, Completed) => true,
            // Money arrived after the sweeper gave up on the order.
            (Cancelled(CancelReason::Expired), Processing) => true,
            _ => false,
        }
    }

    pub fn transition(&self, next: OrderState) -> Result<OrderState> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(StorefrontError::InvalidTransition { from: self.to_string(), to: next.to_string() })
        }
    }

    /// Swept after the timeout: nothing has been heard from a provider yet.
    pub fn is_unpaid(&self) -> bool {
        matches!(self, Self::Pending(PaymentProgress::Unpaid | PaymentProgress::AwaitingPayment))
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed => true,
            Self::Cancelled(reason) => *reason != CancelReason::Expired,
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, payment) = self.columns();
        write!(f, "{status}/{payment}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    pub total: Decimal,
    pub state: OrderState,
    pub payment_method: PaymentMethod,
    pub warranty_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn create(user_id: Uuid, order_number: impl Into<String>, total: Money, payment_method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, order_number: order_number.into(), total: total.amount(),
            state: OrderState::NEW, payment_method, warranty_expires_at: None, created_at: now, updated_at: now,
        }
    }

    /// A top-up order carries no lines; paying it credits the wallet.
    pub fn is_topup(&self) -> bool { self.payment_method == PaymentMethod::WalletTopup }
    pub fn total(&self) -> Money { Money::new(self.total) }
    pub fn is_owned_by(&self, user_id: Uuid) -> bool { self.user_id == user_id }
}

/// One delivered inventory unit on a line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredUnit {
    /// `None` when the payload came from an unlimited variant's shared template.
    pub record_id: Option<Uuid>,
    pub payload: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_type: ProductType,
    pub quantity: i32,
    /// Frozen at purchase time.
    pub unit_price: Decimal,
    pub flash_sale_id: Option<Uuid>,
    pub deliveries: Vec<DeliveredUnit>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

impl OrderLine {
    pub fn line_total(&self) -> Money { Money::new(self.unit_price).multiply(self.quantity.max(0) as u32) }

    pub fn missing_units(&self) -> usize {
        if !self.product_type.is_inventory_bearing() {
            return 0;
        }
        (self.quantity.max(0) as usize).saturating_sub(self.deliveries.len())
    }

    pub fn is_delivered(&self) -> bool { self.missing_units() == 0 }

    /// Joined payloads once every unit is in; `None` while anything is missing
    /// and for lines that carry no inventory.
    pub fn delivered_payload(&self) -> Option<String> {
        if !self.product_type.is_inventory_bearing() || !self.is_delivered() {
            return None;
        }
        Some(self.deliveries.iter().map(|u| u.payload.as_str()).collect::<Vec<_>>().join("\n"))
    }
}
