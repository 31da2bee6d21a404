use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::Serialize;

use super::AppState;
use crate::auth::Caller;
use crate::wallet::WalletLedger;
use crate::{Result, WalletTransaction};

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub balance: Decimal,
    pub transactions: Vec<WalletTransaction>,
}

pub async fn get_wallet(State(s): State<AppState>, caller: Caller) -> Result<Json<WalletView>> {
    let ledger = WalletLedger::new(s.store.as_ref(), &s.events);
    let balance = ledger.balance(caller.user_id).await?.amount();
    let transactions = ledger.recent(caller.user_id).await?;
    Ok(Json(WalletView { balance, transactions }))
}
