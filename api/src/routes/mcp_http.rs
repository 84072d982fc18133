use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use gatehouse_mcp_runtime::{CallerIdentity, MCP_PROTOCOL_VERSION, MCP_SERVER_NAME};

use crate::middleware::access_gate::VerifiedAgent;
use crate::state::AppState;

const MCP_PATH: &str = "/mcp";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post).get(mcp_get))
}

/// Static server/capability info. Public: clients read this before they
/// have a token.
async fn mcp_get() -> Json<Value> {
    Json(json!({
        "name": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "transport": "http",
        "methods": [
            "initialize", "ping",
            "tools/list", "tools/call",
            "resources/list", "resources/read",
            "prompts/list", "prompts/get"
        ],
        "authentication": {
            "token_endpoint": "/v1/agent/token",
            "header": "Authorization: Bearer <token>"
        }
    }))
}

/// JSON-RPC 2.0 endpoint: a single request object or a batch array.
///
/// The access gate has already verified the token; the verified identity
/// rides in as a request extension and becomes the dispatcher's caller.
async fn mcp_post(State(state): State<AppState>, agent: VerifiedAgent, body: Bytes) -> Response {
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": "Parse error"
                    }
                })),
            )
                .into_response();
        }
    };

    let claims = agent.claims;
    let caller = CallerIdentity {
        agent_id: claims.sub,
        provider: claims.provider,
        permissions: claims.permissions,
        scopes: claims.scopes,
    };

    let responses = state.mcp.handle_incoming(&caller, incoming).await;

    if responses.is_empty() {
        // Notifications only: nothing to say back.
        return StatusCode::ACCEPTED.into_response();
    }

    if responses.len() == 1 {
        return (
            StatusCode::OK,
            Json(responses.into_iter().next().unwrap_or(Value::Null)),
        )
            .into_response();
    }

    (StatusCode::OK, Json(Value::Array(responses))).into_response()
}
