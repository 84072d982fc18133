use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get, routing::post};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use gatehouse_core::error::{ApiEnvelope, ResponseMeta};
use gatehouse_core::registry::{self, RegistryError};
use gatehouse_core::token::detect_provider;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::middleware::access_gate::{RequestContext, VerifiedAgent};
use crate::state::AppState;

pub fn issue_router() -> Router<AppState> {
    Router::new().route("/v1/agent/token", post(issue_token))
}

pub fn introspect_router() -> Router<AppState> {
    Router::new().route("/v1/agent/token/introspect", get(introspect_token))
}

// ──────────────────────────────────────────────
// POST /v1/agent/token
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TokenRequest {
    /// Agent id, if known. Alternative to provider + name.
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub agent_secret: Option<String>,
    /// Requested scopes; defaults to the global wildcard.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Exchange agent credentials for a signed, time-bound token.
#[utoipa::path(
    post,
    path = "/v1/agent/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = gatehouse_core::error::ApiEnvelope),
        (status = 400, description = "Missing credentials", body = gatehouse_core::error::ApiEnvelope),
        (status = 401, description = "Invalid credentials", body = gatehouse_core::error::ApiEnvelope)
    ),
    tag = "auth"
)]
pub async fn issue_token(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Some(secret) = req.agent_secret.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Err(AppError::MissingCredentials {
            message: "agent_secret is required".to_string(),
        });
    };

    let record = match (req.agent_id, req.provider.as_deref(), req.name.as_deref()) {
        (Some(agent_id), _, _) => state.registry.find_by_id(agent_id),
        (None, Some(provider), Some(name)) => state.registry.find_by_name(provider, name),
        _ => {
            return Err(AppError::MissingCredentials {
                message: "Provide agent_id, or provider together with name".to_string(),
            });
        }
    };

    let record = match record {
        Ok(record) => record,
        // Uniform 401 so callers cannot probe which part was wrong.
        Err(RegistryError::NotFound) => return Err(AppError::InvalidCredentials),
        Err(RegistryError::Unavailable(detail)) => return Err(AppError::Upstream(detail)),
    };

    if !registry::verify_secret(&record, secret) {
        tracing::warn!(
            agent_id = %record.identity.id,
            decision = "deny",
            "credential exchange decision"
        );
        return Err(AppError::InvalidCredentials);
    }

    // Advisory label only; authorization comes from the registry grant.
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::info!(
        agent_id = %record.identity.id,
        provider = %record.identity.provider,
        detected_provider = detect_provider(user_agent),
        decision = "allow",
        "credential exchange decision"
    );

    let issued = state
        .tokens
        .issue(&record.identity, record.permissions, req.scopes)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let data = serde_json::to_value(&issued).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(ApiEnvelope::ok(data, ResponseMeta::new(ctx.request_id))))
}

// ──────────────────────────────────────────────
// GET /v1/agent/token/introspect
// ──────────────────────────────────────────────

/// Decode the presented token's claims. The access gate has already
/// verified the credential; this endpoint just reflects what it carries.
#[utoipa::path(
    get,
    path = "/v1/agent/token/introspect",
    responses(
        (status = 200, description = "Decoded claims", body = gatehouse_core::error::ApiEnvelope),
        (status = 401, description = "Missing or invalid token", body = gatehouse_core::error::ApiEnvelope)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn introspect_token(
    agent: VerifiedAgent,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let now = chrono::Utc::now();
    let claims = &agent.claims;

    Ok(Json(ApiEnvelope::ok(
        json!({
            "agent_id": claims.sub,
            "provider": claims.provider,
            "permissions": claims.permissions,
            "scopes": claims.scopes,
            "issued_at": claims.iat,
            "expires_at": claims.exp,
            "is_expired": claims.is_expired(now),
            "remaining_seconds": claims.remaining_seconds(now),
        }),
        ResponseMeta::new(ctx.request_id),
    )))
}
