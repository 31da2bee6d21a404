//! Operator routes; every handler requires the admin role.

use axum::{extract::{Path, State}, Json};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::auth::Caller;
use crate::fulfillment::FulfillmentEngine;
use crate::payments::Reconciler;
use crate::{sweeper, Result};

pub async fn fulfill_order(State(s): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    caller.require_admin()?;
    info!(order_id = %id, admin = %caller.user_id, "manual fulfillment re-drive");
    let report = FulfillmentEngine::new(s.store.as_ref(), &s.events, s.config.default_warranty_days).fulfill(id).await?;
    Ok(Json(json!({ "success": true, "fulfillment": report })))
}

pub async fn confirm_payment(State(s): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    caller.require_admin()?;
    info!(order_id = %id, admin = %caller.user_id, "manual payment confirmation");
    let outcome = Reconciler::new(s.store.as_ref(), &s.events, s.config.default_warranty_days).confirm_manually(id).await?;
    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

pub async fn run_sweep(State(s): State<AppState>, caller: Caller) -> Result<Json<Value>> {
    caller.require_admin()?;
    let timeout = Duration::minutes(s.config.order_expiry_minutes);
    let report = sweeper::sweep(s.store.as_ref(), &s.events, timeout, Utc::now()).await?;
    let mut body = serde_json::to_value(&report).map_err(|e| crate::StorefrontError::StorageError(e.to_string()))?;
    if let Value::Object(map) = &mut body {
        map.insert("success".into(), json!(true));
    }
    Ok(Json(body))
}
