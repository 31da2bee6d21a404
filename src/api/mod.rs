//! HTTP surface: shared state, the router, and request handlers.

mod admin;
mod catalog;
pub mod error;
mod orders;
mod wallet;
mod webhooks;

use axum::{extract::FromRef, routing::{get, post}, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::events::EventPublisher;
use crate::payments::ProviderRegistry;
use crate::rate_limit::{BoundedRateLimiter, RateLimit};
use crate::store::Store;

pub use orders::{CreateOrderRequest, CreateOrderItem, LineView, OrderView};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub events: EventPublisher,
    pub limiter: Arc<dyn RateLimit>,
    pub providers: ProviderRegistry,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config, events: EventPublisher) -> Self {
        let limiter = BoundedRateLimiter::new(
            config.rate_limit_max_requests,
            Duration::from_secs(config.rate_limit_window_secs),
            config.rate_limit_capacity,
        );
        Self {
            store,
            events,
            limiter: Arc::new(limiter),
            providers: ProviderRegistry::from_secrets(&config.providers),
            jwt: Arc::new(JwtKeys::new(&config.jwt_secret)),
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/v1/products", get(catalog::list_products))
        .route("/api/v1/products/:id", get(catalog::get_product))
        .route("/api/v1/orders", get(orders::list_orders).post(orders::create_order))
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/wallet", get(wallet::get_wallet))
        .route("/api/v1/webhooks/:provider", post(webhooks::receive))
        .route("/api/v1/admin/orders/:id/fulfill", post(admin::fulfill_order))
        .route("/api/v1/admin/orders/:id/confirm-payment", post(admin::confirm_payment))
        .route("/api/v1/internal/sweep", post(admin::run_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
