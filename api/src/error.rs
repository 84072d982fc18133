use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gatehouse_core::error::{ApiEnvelope, ResponseMeta, codes};

/// Internal error type that converts to the uniform failure envelope.
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
    },
    /// Credential exchange called without usable credentials (400)
    MissingCredentials { message: String },
    /// Credential exchange failed (401)
    InvalidCredentials,
    /// Missing or unverifiable token (401)
    Unauthorized {
        code: &'static str,
        message: String,
    },
    /// Auxiliary store unavailable on a path that cannot degrade (503)
    Upstream(String),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // TODO: thread the gate's RequestContext into handler errors so
        // these envelopes reuse its request id instead of minting one.
        let request_id = uuid::Uuid::now_v7().to_string();
        let meta = ResponseMeta::new(request_id);

        let (status, code, message) = match self {
            AppError::Validation { message, field } => {
                let message = match field {
                    Some(field) => format!("{message} (field: {field})"),
                    None => message,
                };
                (StatusCode::BAD_REQUEST, codes::VALIDATION_FAILED, message)
            }
            AppError::MissingCredentials { message } => {
                (StatusCode::BAD_REQUEST, codes::MISSING_CREDENTIALS, message)
            }
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                codes::INVALID_CREDENTIALS,
                "Agent credentials were not accepted".to_string(),
            ),
            AppError::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message)
            }
            AppError::Upstream(detail) => {
                tracing::error!("upstream collaborator unavailable: {detail}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::UPSTREAM_UNAVAILABLE,
                    "A required upstream store is unavailable".to_string(),
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::INTERNAL_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ApiEnvelope::fail(code, message, meta))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unauthorized_maps_to_envelope_with_code() {
        let response = AppError::Unauthorized {
            code: codes::TOKEN_EXPIRED,
            message: "token has expired".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "TOKEN_EXPIRED");
        assert!(value["meta"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_detail() {
        let response = AppError::Internal("secret pool state".to_string()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(!value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("secret"));
    }
}
