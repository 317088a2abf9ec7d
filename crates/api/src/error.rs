//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orders::OrdersError;
use outbox::OutboxError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order operation error.
    Orders(OrdersError),
    /// Outbox operation error.
    Outbox(OutboxError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orders(err) => orders_error_to_response(err),
            ApiError::Outbox(err) => outbox_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn orders_error_to_response(err: OrdersError) -> (StatusCode, String) {
    match &err {
        OrdersError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrdersError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        OrdersError::Conflict(_)
        | OrdersError::AlreadyExists(_)
        | OrdersError::RefundNotAllowed { .. }
        | OrdersError::InsufficientInventory { .. }
        | OrdersError::SlotUnavailable { .. }
        | OrdersError::Domain(_) => (StatusCode::CONFLICT, err.to_string()),
        OrdersError::Expired(_) | OrdersError::ReservationExpired(_) => {
            (StatusCode::GONE, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn outbox_error_to_response(err: OutboxError) -> (StatusCode, String) {
    match &err {
        OutboxError::DlqEntryNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OutboxError::AlreadyReprocessed(_) => (StatusCode::CONFLICT, err.to_string()),
        OutboxError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<OrdersError> for ApiError {
    fn from(err: OrdersError) -> Self {
        ApiError::Orders(err)
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        ApiError::Outbox(err)
    }
}

impl From<storage::StorageError> for ApiError {
    fn from(err: storage::StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
