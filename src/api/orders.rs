use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::auth::Caller;
use crate::domain::aggregates::Cart;
use crate::orders::{Checkout, OrderBuilder};
use crate::{Money, Order, OrderLine, PaymentMethod, Result, StorefrontError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub items: Vec<CreateOrderItem>,
    #[validate(length(min = 1, max = 32))]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub wallet_topup: bool,
    pub topup_amount: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i64,
}

impl CreateOrderRequest {
    fn is_topup(&self) -> bool {
        self.wallet_topup || self.payment_method.as_deref() == Some(PaymentMethod::WalletTopup.as_str())
    }

    pub fn into_checkout(self) -> Result<Checkout> {
        if self.is_topup() {
            if !self.items.is_empty() {
                return Err(StorefrontError::InvalidRequest("wallet top-ups carry an amount, not items".into()));
            }
            let amount = self.topup_amount.ok_or_else(|| StorefrontError::InvalidRequest("topup_amount is required".into()))?;
            return Ok(Checkout::Topup { amount: Money::new(amount) });
        }
        let method = self.payment_method.ok_or_else(|| StorefrontError::InvalidRequest("payment_method is required".into()))?;
        let cart = Cart::from_items(self.items.into_iter().map(|i| (i.product_id, i.variant_id, i.quantity)))?;
        Ok(Checkout::Cart { cart, payment_method: PaymentMethod::parse(&method) })
    }
}

#[derive(Debug, Serialize)]
pub struct LineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub flash_sale: bool,
    pub delivered: bool,
    /// Only once every unit is in.
    pub payload: Option<String>,
}

impl From<&OrderLine> for LineView {
    fn from(line: &OrderLine) -> Self {
        Self {
            id: line.id,
            product_id: line.product_id,
            variant_id: line.variant_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total().amount(),
            flash_sale: line.flash_sale_id.is_some(),
            delivered: line.is_delivered(),
            payload: line.delivered_payload(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub status: &'static str,
    pub payment_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<&'static str>,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub warranty_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<LineView>>,
}

impl OrderView {
    pub fn new(order: &Order, lines: Option<&[OrderLine]>) -> Self {
        let (status, payment_status) = order.state.columns();
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            status,
            payment_status,
            cancel_reason: order.state.cancel_reason(),
            total: order.total,
            payment_method: order.payment_method.clone(),
            warranty_expires_at: order.warranty_expires_at,
            created_at: order.created_at,
            lines: lines.map(|lines| lines.iter().map(LineView::from).collect()),
        }
    }
}

pub async fn create_order(State(s): State<AppState>, caller: Caller, Json(req): Json<CreateOrderRequest>) -> Result<impl IntoResponse> {
    req.validate().map_err(|e| StorefrontError::InvalidRequest(e.to_string()))?;
    s.limiter.check(&caller.user_id.to_string()).await?;

    let checkout = req.into_checkout()?;
    if let Checkout::Cart { payment_method: PaymentMethod::External(tag), .. } = &checkout {
        if s.providers.get(tag).is_err() {
            warn!(user_id = %caller.user_id, method = %tag, "order rejected: unsupported payment method");
            return Err(StorefrontError::InvalidRequest(format!("unsupported payment method '{tag}'")));
        }
    }

    let placed = OrderBuilder::new(s.store.as_ref(), &s.events, s.config.order_policy()).place(caller.user_id, checkout).await?;
    let body = serde_json::json!({
        "success": true,
        "order": OrderView::new(&placed.order, Some(placed.lines.as_slice())),
        "fulfillment": placed.fulfillment,
    });
    Ok((StatusCode::CREATED, Json(body)))
}

pub async fn list_orders(State(s): State<AppState>, caller: Caller) -> Result<Json<Vec<OrderView>>> {
    let mut orders = s.store.orders_for_user(caller.user_id).await?;
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(orders.iter().map(|o| OrderView::new(o, None)).collect()))
}

pub async fn get_order(State(s): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<OrderView>> {
    let order = s.store.order(id).await?.ok_or(StorefrontError::OrderNotFound)?;
    if !order.is_owned_by(caller.user_id) && !caller.is_admin() {
        warn!(order_id = %id, user_id = %caller.user_id, "order read denied");
        return Err(StorefrontError::Forbidden);
    }
    let lines = s.store.order_lines(id).await?;
    Ok(Json(OrderView::new(&order, Some(lines.as_slice()))))
}
