//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_store::OrderStoreError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// No credentials were supplied.
    Unauthorized(String),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::InvalidRequest(_)
        | SagaError::MissingIdempotencyKey
        | SagaError::StatusNotSettable(_) => StatusCode::BAD_REQUEST,
        SagaError::IdempotencyKeyReused { .. }
        | SagaError::CompensationNotAllowed { .. }
        | SagaError::StatusTransitionNotAllowed { .. } => StatusCode::CONFLICT,
        SagaError::OrderNotFound(_) | SagaError::Store(OrderStoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        SagaError::Store(
            OrderStoreError::Conflict { .. }
            | OrderStoreError::StaleState { .. }
            | OrderStoreError::InvalidTransition { .. },
        ) => StatusCode::CONFLICT,
        SagaError::Store(_) => {
            tracing::error!(error = %err, "order store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{IdempotencyKey, OrderId};
    use domain::{OrderError, OrderStatus};

    use super::*;

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_saga_error_mapping() {
        assert_eq!(
            status_of(SagaError::InvalidRequest(OrderError::NoItems)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::MissingIdempotencyKey),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::IdempotencyKeyReused {
                key: IdempotencyKey::new("k"),
                existing: OrderId::new(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::OrderNotFound(OrderId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::StatusNotSettable(OrderStatus::Cancelled)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::StatusTransitionNotAllowed {
                order_id: OrderId::new(),
                from: OrderStatus::Shipped,
                to: OrderStatus::Processing,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::Store(OrderStoreError::InvalidTransition {
                order_id: OrderId::new(),
                from: "pending",
                to: "shipped",
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::Store(OrderStoreError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized() {
        let response = ApiError::Unauthorized("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
