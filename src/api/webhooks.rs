use axum::{body::Bytes, extract::{Path, State}, http::HeaderMap, Json};
use serde_json::{json, Value};
use tracing::info;

use super::AppState;
use crate::payments::Reconciler;
use crate::Result;

/// Provider callbacks. Ignored and duplicate notifications still answer 200
/// so providers stop retrying.
pub async fn receive(State(s): State<AppState>, Path(provider): Path<String>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>> {
    let adapter = s.providers.get(&provider)?;
    let outcome = Reconciler::new(s.store.as_ref(), &s.events, s.config.default_warranty_days)
        .accept_unverified(s.config.allow_unverified_webhooks)
        .handle(adapter.as_ref(), &body, &headers)
        .await?;
    info!(provider = adapter.name(), ?outcome, "webhook processed");
    Ok(Json(json!({ "received": true, "outcome": outcome })))
}
