//! Uniform response envelope and machine-readable error codes.
//!
//! Every non-JSON-RPC endpoint answers with the same shape:
//! `{success, data | error{code, message}, meta{timestamp, request_id, version}}`.
//! JSON-RPC responses use the protocol's own error objects instead.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Error codes used across the gateway.
pub mod codes {
    pub const AGENT_BLOCKED: &str = "AGENT_BLOCKED";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const TOKEN_REQUIRED: &str = "TOKEN_REQUIRED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const MALFORMED_TOKEN: &str = "MALFORMED_TOKEN";
    pub const MISSING_CREDENTIALS: &str = "MISSING_CREDENTIALS";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const SCOPE_DENIED: &str = "SCOPE_DENIED";
    pub const GUARDRAIL_DENIED: &str = "GUARDRAIL_DENIED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// `error` object inside a failure envelope.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable code from [`codes`].
    pub code: String,
    /// Human/agent-readable description.
    pub message: String,
}

/// `meta` object attached to every envelope.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
    /// Set when an auxiliary store was unavailable and a conservative
    /// default was substituted. Never silent.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ResponseMeta {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            degraded: false,
        }
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// The uniform envelope for non-JSON-RPC endpoints.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: ResponseMeta,
}

impl ApiEnvelope {
    pub fn ok(data: serde_json::Value, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn fail(code: impl Into<String>, message: impl Into<String>, meta: ResponseMeta) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_carries_code_and_message() {
        let env = ApiEnvelope::fail(
            codes::RATE_LIMIT_EXCEEDED,
            "Too many requests",
            ResponseMeta::new("req-1"),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(value["meta"]["request_id"], "req-1");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn degraded_flag_is_omitted_unless_set() {
        let ok = ApiEnvelope::ok(serde_json::json!({}), ResponseMeta::new("req-2"));
        let value = serde_json::to_value(&ok).unwrap();
        assert!(value["meta"].get("degraded").is_none());

        let degraded =
            ApiEnvelope::ok(serde_json::json!({}), ResponseMeta::new("req-3").degraded());
        let value = serde_json::to_value(&degraded).unwrap();
        assert_eq!(value["meta"]["degraded"], true);
    }
}
