use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde_json::json;

use gatehouse_core::error::{ApiEnvelope, ResponseMeta};

use crate::middleware::access_gate::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/agent/info", get(agent_info))
}

/// Health check endpoint. Public, never gated by token requirements.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = gatehouse_core::error::ApiEnvelope)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>, ctx: RequestContext) -> impl IntoResponse {
    let uptime_seconds = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(ApiEnvelope::ok(
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": uptime_seconds,
        }),
        ResponseMeta::new(ctx.request_id),
    ))
}

/// Public capability snapshot for agents probing the gateway before
/// authenticating.
#[utoipa::path(
    get,
    path = "/v1/agent/info",
    responses(
        (status = 200, description = "Gateway capabilities", body = gatehouse_core::error::ApiEnvelope)
    ),
    tag = "system"
)]
pub async fn agent_info(ctx: RequestContext) -> impl IntoResponse {
    Json(ApiEnvelope::ok(
        json!({
            "name": "gatehouse",
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": {
                "endpoint": "/mcp",
                "transport": "http",
                "version": gatehouse_mcp_runtime::MCP_PROTOCOL_VERSION,
            },
            "auth": {
                "token_endpoint": "/v1/agent/token",
                "header": "Authorization: Bearer <token>",
                "alternate_header": "X-Agent-Token",
            },
        }),
        ResponseMeta::new(ctx.request_id),
    ))
}
