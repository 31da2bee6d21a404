//! `StorefrontError` as an HTTP response: `{ "error": code, "message": .., ...context }`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::StorefrontError;

impl StorefrontError {
    pub fn status_code(&self) -> StatusCode {
        use StorefrontError::*;
        match self {
            ProductNotFound(_) | VariantNotFound(_) | OrderNotFound | UnknownProvider(_) => StatusCode::NOT_FOUND,
            ProductInactive(_)
            | EmptyCart
            | InvalidQuantity
            | InvalidRequest(_)
            | TopupBelowMinimum { .. }
            | InsufficientStock { .. }
            | NoMatchingInventory { .. }
            | InsufficientBalance { .. }
            | MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Unauthorized(_) | InvalidSignature => StatusCode::UNAUTHORIZED,
            Forbidden => StatusCode::FORBIDDEN,
            InvalidTransition { .. } | Conflict(_) => StatusCode::CONFLICT,
            RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            OrderNumberCollision | StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        use StorefrontError::*;
        match self {
            ProductNotFound(_) => "product_not_found",
            VariantNotFound(_) => "variant_not_found",
            ProductInactive(_) => "product_inactive",
            OrderNotFound => "order_not_found",
            EmptyCart => "empty_cart",
            InvalidQuantity => "invalid_quantity",
            InvalidRequest(_) => "invalid_request",
            TopupBelowMinimum { .. } => "topup_below_minimum",
            InsufficientStock { .. } => "insufficient_stock",
            NoMatchingInventory { .. } => "no_matching_inventory",
            InsufficientBalance { .. } => "insufficient_balance",
            InvalidTransition { .. } => "invalid_transition",
            OrderNumberCollision => "order_number_collision",
            Unauthorized(_) => "unauthorized",
            Forbidden => "forbidden",
            InvalidSignature => "invalid_signature",
            MalformedPayload(_) => "malformed_payload",
            UnknownProvider(_) => "unknown_provider",
            RateLimited { .. } => "rate_limited",
            Conflict(_) => "conflict",
            StorageError(_) => "internal_error",
        }
    }

    /// Structured fields a client can act on.
    fn context(&self) -> Map<String, Value> {
        use StorefrontError::*;
        let value = match self {
            ProductNotFound(id) | ProductInactive(id) => json!({ "product_id": id }),
            VariantNotFound(id) => json!({ "variant_id": id }),
            TopupBelowMinimum { minimum } => json!({ "minimum": minimum }),
            InsufficientStock { product_id, requested, available } => {
                json!({ "product_id": product_id, "requested": requested, "available": available })
            }
            NoMatchingInventory { product_id, variant_id } => json!({ "product_id": product_id, "variant_id": variant_id }),
            InsufficientBalance { required, available } => json!({ "required": required, "available": available }),
            RateLimited { retry_after_secs } => json!({ "retry_after_secs": retry_after_secs }),
            _ => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl IntoResponse for StorefrontError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = self.context();
        body.insert("error".into(), json!(self.code()));
        body.insert("message".into(), json!(message));

        let mut response = (status, Json(Value::Object(body))).into_response();
        if let StorefrontError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
