use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use opensase_storefront::api::{router, AppState};
use opensase_storefront::auth::ADMIN_ROLE;
use opensase_storefront::config::Config;
use opensase_storefront::events::EventPublisher;
use opensase_storefront::payments::{hmac_hex, HmacAlgorithm};
use opensase_storefront::store::MemoryStore;
use opensase_storefront::{InventoryRecord, Product, ProductType};

const OXAPAY_KEY: &str = "oxapay-merchant-key";

struct TestApp {
    app: Router,
    state: AppState,
    store: MemoryStore,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(mut config: Config) -> Self {
        config.providers.oxapay_merchant_key = Some(OXAPAY_KEY.into());
        let store = MemoryStore::new();
        let state = AppState::new(Arc::new(store.clone()), config, EventPublisher::default());
        Self { app: router(state.clone()), state, store }
    }

    fn token(&self, user: Uuid, admin: bool) -> String {
        let role = admin.then_some(ADMIN_ROLE);
        self.state.jwt.issue(user, role, Duration::minutes(10)).unwrap()
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        self.send(req).await
    }

    async fn webhook(&self, provider: &str, raw: &str, signature: Option<String>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(Method::POST).uri(format!("/api/v1/webhooks/{provider}"));
        if let Some(sig) = signature {
            req = req.header("hmac", sig);
        }
        self.send(req.body(Body::from(raw.to_string())).unwrap()).await
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    async fn account_product(&self, stock: usize) -> Product {
        let product = Product { id: Uuid::new_v4(), name: "Streaming account".into(), price: dec!(10),
                                product_type: ProductType::Account, is_active: true, sales_count: 0,
                                warranty_days: Some(30), created_at: Utc::now() };
        self.store.insert_product(product.clone()).await;
        for i in 0..stock {
            self.store.insert_record(InventoryRecord { id: Uuid::new_v4(), product_id: product.id, variant_id: None,
                                                       payload: format!("user{i}:pass{i}"), is_sold: false, sold_at: None }).await;
        }
        product
    }
}

fn signed(raw: &str) -> String {
    hmac_hex(HmacAlgorithm::Sha512, OXAPAY_KEY.as_bytes(), raw.as_bytes()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_orders_require_bearer_token() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app.call(Method::GET, "/api/v1/orders", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_topup_webhook_then_wallet_purchase() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let token = app.token(user, false);
    let product = app.account_product(3).await;

    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(&token),
                                  Some(json!({"wallet_topup": true, "topup_amount": 25}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order"]["status"], "pending");
    let order_number = body["order"]["order_number"].as_str().unwrap().to_string();

    let raw = json!({"status": "Paid", "orderId": order_number, "amount": 25}).to_string();
    let (status, body) = app.webhook("oxapay", &raw, Some(signed(&raw))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["result"], "settled");

    // Provider retry: acknowledged, nothing credited twice.
    let (status, body) = app.webhook("oxapay", &raw, Some(signed(&raw))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"], "already_settled");

    let (_, wallet) = app.call(Method::GET, "/api/v1/wallet", Some(&token), None).await;
    assert_eq!(wallet["balance"], "25");
    assert_eq!(wallet["transactions"].as_array().unwrap().len(), 1);

    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(&token), Some(json!({
        "items": [{"product_id": product.id, "quantity": 2}],
        "payment_method": "wallet",
    }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["fulfillment"]["completed"], true);
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, order) = app.call(Method::GET, &format!("/api/v1/orders/{order_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "completed");
    assert_eq!(order["payment_status"], "paid");
    assert!(order["warranty_expires_at"].is_string());
    let payload = order["lines"][0]["payload"].as_str().unwrap();
    assert_eq!(payload.lines().count(), 2);

    let (_, wallet) = app.call(Method::GET, "/api/v1/wallet", Some(&token), None).await;
    assert_eq!(wallet["balance"], "5");

    let (_, orders) = app.call(Method::GET, "/api/v1/orders", Some(&token), None).await;
    assert_eq!(orders.as_array().unwrap().len(), 2);

    let (_, listed) = app.call(Method::GET, &format!("/api/v1/products/{}", product.id), None, None).await;
    assert_eq!(listed["in_stock"], 1);
    assert_eq!(listed["sales_count"], 2);
}

#[tokio::test]
async fn test_short_wallet_reports_amounts() {
    let app = TestApp::new();
    let token = app.token(Uuid::new_v4(), false);
    let product = app.account_product(1).await;

    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(&token), Some(json!({
        "items": [{"product_id": product.id, "quantity": 1}],
        "payment_method": "wallet",
    }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "insufficient_balance");
    assert_eq!(body["required"], "10");
    assert_eq!(body["available"], "0");
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_order_read_is_owner_only() {
    let app = TestApp::new();
    let owner = app.token(Uuid::new_v4(), false);
    let (_, body) = app.call(Method::POST, "/api/v1/orders", Some(&owner),
                             Some(json!({"wallet_topup": true, "topup_amount": 5}))).await;
    let uri = format!("/api/v1/orders/{}", body["order"]["id"].as_str().unwrap());

    let stranger = app.token(Uuid::new_v4(), false);
    let (status, _) = app.call(Method::GET, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.token(Uuid::new_v4(), true);
    let (status, _) = app.call(Method::GET, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, &format!("/api/v1/orders/{}", Uuid::new_v4()), Some(&owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_rejections() {
    let app = TestApp::new();
    let (status, body) = app.webhook("stripe", "{}", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_provider");

    let raw = json!({"status": "Paid", "orderId": "ORD-20240101-AAAAAA"}).to_string();
    let (status, _) = app.webhook("oxapay", &raw, Some("00".repeat(64))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.webhook("oxapay", &raw, Some(signed(&raw))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "order_not_found");

    let (status, _) = app.webhook("oxapay", "not json", Some(signed("not json"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unverified_paypal_capture_is_refused() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let token = app.token(user, false);
    let (_, body) = app.call(Method::POST, "/api/v1/orders", Some(&token),
                             Some(json!({"wallet_topup": true, "topup_amount": 40}))).await;
    let order_number = body["order"]["order_number"].as_str().unwrap().to_string();

    let forged = json!({
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": { "custom_id": order_number, "amount": { "value": "40.00" } }
    })
    .to_string();
    let (status, body) = app.webhook("paypal", &forged, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_signature");

    let (_, wallet) = app.call(Method::GET, "/api/v1/wallet", Some(&token), None).await;
    assert_eq!(wallet["balance"], "0");
}

#[tokio::test]
async fn test_admin_routes_need_admin_role() {
    let app = TestApp::new();
    let customer = app.token(Uuid::new_v4(), false);
    let (status, _) = app.call(Method::POST, "/api/v1/internal/sweep", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.token(Uuid::new_v4(), true);
    let (status, body) = app.call(Method::POST, "/api/v1/internal/sweep", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["cancelled_count"], 0);
    assert!(body.get("errors").is_none());
}

#[tokio::test]
async fn test_manual_confirmation_credits_deposit() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let token = app.token(user, false);
    let (_, body) = app.call(Method::POST, "/api/v1/orders", Some(&token),
                             Some(json!({"wallet_topup": true, "topup_amount": 12.5}))).await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let admin = app.token(Uuid::new_v4(), true);
    let uri = format!("/api/v1/admin/orders/{order_id}/confirm-payment");
    let (status, body) = app.call(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"], "settled");

    let (_, wallet) = app.call(Method::GET, "/api/v1/wallet", Some(&token), None).await;
    assert_eq!(wallet["balance"], "12.5");
    assert_eq!(wallet["transactions"][0]["kind"], "deposit");

    // Re-driving a completed order is a no-op.
    let (status, body) = app.call(Method::POST, &format!("/api/v1/admin/orders/{order_id}/fulfill"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fulfillment"]["completed"], true);
}

#[tokio::test]
async fn test_order_submission_is_rate_limited() {
    let config = Config { rate_limit_max_requests: 2, ..Config::default() };
    let app = TestApp::with_config(config);
    let token = app.token(Uuid::new_v4(), false);
    let topup = json!({"wallet_topup": true, "topup_amount": 5});

    for _ in 0..2 {
        let (status, _) = app.call(Method::POST, "/api/v1/orders", Some(&token), Some(topup.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(&token), Some(topup)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn test_unsupported_payment_method_rejected() {
    let app = TestApp::new();
    let token = app.token(Uuid::new_v4(), false);
    let product = app.account_product(1).await;
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(&token), Some(json!({
        "items": [{"product_id": product.id, "quantity": 1}],
        "payment_method": "carrier-pigeon",
    }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
