use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::repositories::store::StoreError;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A persistence error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The OS random source could not produce bytes for a security token.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    /// A password hashing error.
    #[error("Password hashing error: {0}")]
    Hashing(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Attached to every `AppError` response so a pipeline can re-render the
/// failure for its own surface.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Builds the JSON error body shared by every API-facing rejection.
///
/// `code` is the stable, machine-readable discriminator; `message` is for humans
/// and may change freely.
pub fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
    let error = status
        .canonical_reason()
        .unwrap_or("error")
        .to_ascii_lowercase()
        .replace(' ', "_");

    let body = sonic_rs::to_string(&sonic_rs::json!({
        "error": error,
        "message": message,
        "code": code,
    }))
    .unwrap_or_else(|_| {
        r#"{"error":"internal_server_error","message":"Internal server error","code":"internal"}"#
            .to_string()
    });

    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Store(StoreError::NotFound) => {
                tracing::debug!("Store lookup returned no rows");
                (StatusCode::NOT_FOUND, "not_found", "Resource not found".to_string())
            }

            AppError::Store(StoreError::Conflict) => {
                tracing::debug!("Store rejected a duplicate record");
                (StatusCode::CONFLICT, "conflict", "Resource already exists".to_string())
            }

            AppError::Store(ref e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "authentication_failed", msg.clone())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, "validation_failed", msg.clone())
            }

            AppError::Entropy(ref msg) => {
                tracing::error!("Entropy source unavailable: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }

            AppError::Hashing(ref msg) => {
                tracing::error!("Password hashing error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }
        };

        let mut response = json_error(status, code, &message);
        response.extensions_mut().insert(ErrorReport { code, message });
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response =
            AppError::Internal("connection reset by 10.0.0.7:5432".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["code"], "internal");
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn json_error_carries_error_message_and_code() {
        let response = json_error(StatusCode::UNAUTHORIZED, "authentication_required", "Sign in");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthorized");
        assert_eq!(body["message"], "Sign in");
        assert_eq!(body["code"], "authentication_required");
    }

    #[test]
    fn responses_carry_an_error_report() {
        let response = AppError::Validation("email: not a valid email".to_string()).into_response();
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.code, "validation_failed");
        assert_eq!(report.message, "email: not a valid email");
    }

    #[tokio::test]
    async fn missing_store_rows_map_to_not_found() {
        let response = AppError::from(StoreError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
