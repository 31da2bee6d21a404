//! Wallet Ledger.
//!
//! Balance and transaction log move together through
//! [`Store::apply_wallet_entry`]; this layer adds signs, error mapping and
//! events. An order is credited at most once and debited at most once,
//! whichever transaction kind each path records.

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, WalletEvent};
use crate::events::EventPublisher;
use crate::store::{Store, WalletEntry, WalletWrite};
use crate::{Money, Result, StorefrontError, TransactionKind, WalletTransaction};

pub const RECENT_TRANSACTIONS: i64 = 50;

pub struct WalletLedger<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
}

impl<'a> WalletLedger<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher) -> Self { Self { store, events } }

    /// Current balance; zero when the wallet has not been created yet.
    pub async fn balance(&self, user_id: Uuid) -> Result<Money> {
        Ok(self.store.wallet(user_id).await?.map(|w| Money::new(w.balance)).unwrap_or(Money::ZERO))
    }

    pub async fn recent(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.store.wallet_transactions(user_id, RECENT_TRANSACTIONS).await
    }

    /// Adds `amount`, creating the wallet on first credit.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: Money,
        kind: TransactionKind,
        order_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Result<WalletWrite> {
        if !amount.is_positive() {
            return Err(StorefrontError::InvalidRequest("credit amount must be positive".into()));
        }
        let entry = WalletEntry { user_id, kind, amount: amount.amount(), description: description.into(), order_id };
        let write = self.store.apply_wallet_entry(&entry).await?;
        match &write {
            WalletWrite::Applied { balance } => {
                info!(%user_id, ?order_id, amount = %amount, balance = %balance, kind = kind.as_str(), "wallet credited");
                self.events
                    .publish(DomainEvent::Wallet(WalletEvent::Credited { user_id, amount: amount.amount(), order_id }))
                    .await;
            }
            WalletWrite::Duplicate { .. } => {
                info!(%user_id, ?order_id, kind = kind.as_str(), "wallet credit already applied");
            }
            WalletWrite::Insufficient { .. } => {
                warn!(%user_id, ?order_id, "credit reported insufficient balance");
            }
        }
        Ok(write)
    }

    /// Subtracts `amount` or fails with `InsufficientBalance`, leaving the
    /// wallet untouched. A repeated debit for the same order is a no-op.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: Money,
        kind: TransactionKind,
        order_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Result<WalletWrite> {
        if !amount.is_positive() {
            return Err(StorefrontError::InvalidRequest("debit amount must be positive".into()));
        }
        let entry = WalletEntry { user_id, kind, amount: -amount.amount(), description: description.into(), order_id };
        let write = self.store.apply_wallet_entry(&entry).await?;
        match &write {
            WalletWrite::Applied { balance } => {
                info!(%user_id, ?order_id, amount = %amount, balance = %balance, "wallet debited");
                self.events
                    .publish(DomainEvent::Wallet(WalletEvent::Debited { user_id, amount: amount.amount(), order_id }))
                    .await;
            }
            WalletWrite::Duplicate { .. } => {
                info!(%user_id, ?order_id, "wallet debit already applied");
            }
            WalletWrite::Insufficient { available } => {
                return Err(StorefrontError::InsufficientBalance { required: amount.amount(), available: *available });
            }
        }
        Ok(write)
    }
}

/// Sum of signed transaction amounts; equals the balance when the log is complete.
pub fn ledger_total(transactions: &[WalletTransaction]) -> Decimal {
    transactions.iter().map(|t| t.amount).sum()
}
