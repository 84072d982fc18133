use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use gatehouse_core::actions::default_catalog;
use gatehouse_core::guardrails::{GuardrailEngine, default_rules};
use gatehouse_core::permissions::Permission;
use gatehouse_core::ratelimit::{DEFAULT_LIMIT, DEFAULT_WINDOW_SECS, FixedWindowLimiter};
use gatehouse_core::registry::{AgentIdentity, AgentRegistry, InMemoryAgentRegistry};
use gatehouse_core::reputation::InMemoryReputationStore;
use gatehouse_core::token::{SigningKey, TokenService};
use gatehouse_mcp_runtime::{McpServer, Storefront};

mod error;
mod extract;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gatehouse API",
        version = "0.1.0",
        description = "Access-control gateway mediating autonomous-agent access to a web service's actions."
    ),
    paths(
        routes::health::health_check,
        routes::health::agent_info,
        routes::tokens::issue_token,
        routes::tokens::introspect_token,
    ),
    components(schemas(
        gatehouse_core::error::ApiEnvelope,
        gatehouse_core::error::ErrorBody,
        gatehouse_core::error::ResponseMeta,
        gatehouse_core::permissions::Permission,
        gatehouse_core::registry::AgentIdentity,
        gatehouse_core::token::IssuedToken,
        routes::tokens::TokenRequest,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

/// Parse one agent spec per comma: `provider:name:secret:perm|perm`.
fn parse_agent_specs(raw: &str) -> Vec<(AgentIdentity, String, Vec<Permission>)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let [provider, name, secret, perms] = parts.as_slice() else {
                tracing::warn!(entry, "skipping malformed agent spec");
                return None;
            };
            let permissions: Vec<Permission> = perms
                .split('|')
                .filter_map(Permission::parse)
                .collect();
            let identity = AgentIdentity {
                id: Uuid::now_v7(),
                name: (*name).to_string(),
                provider: (*provider).to_string(),
                version: None,
                capabilities: Vec::new(),
            };
            Some((identity, (*secret).to_string(), permissions))
        })
        .collect()
}

fn seed_registry(registry: &InMemoryAgentRegistry) {
    let raw = std::env::var("GATEHOUSE_AGENTS").unwrap_or_default();
    let specs = parse_agent_specs(&raw);
    if specs.is_empty() {
        tracing::warn!(
            "no agents configured via GATEHOUSE_AGENTS; token issuance will fail until agents are registered"
        );
        return;
    }
    for (identity, secret, permissions) in specs {
        let provider = identity.provider.clone();
        let name = identity.name.clone();
        let id = registry.register(identity, &secret, permissions);
        tracing::info!(agent_id = %id, provider = %provider, name = %name, "registered agent");
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let signing_key = SigningKey::from_env().expect("signing key configuration");
    let tokens = Arc::new(TokenService::new(&signing_key));

    let registry = Arc::new(InMemoryAgentRegistry::new());
    seed_registry(&registry);

    let limit = env_u64("GATEHOUSE_RATE_LIMIT", u64::from(DEFAULT_LIMIT)) as u32;
    let window_secs = env_u64("GATEHOUSE_RATE_WINDOW_SECS", DEFAULT_WINDOW_SECS);
    let limiter = Arc::new(FixedWindowLimiter::new(
        limit,
        Duration::from_secs(window_secs),
    ));

    let blocklist = Arc::new(middleware::access_gate::Blocklist::from_env());

    let reputation = Arc::new(InMemoryReputationStore::new());
    let guardrails = Arc::new(GuardrailEngine::new(default_rules()));
    let storefront = Arc::new(Storefront::with_demo_inventory());
    let mcp = Arc::new(McpServer::new(
        default_catalog(),
        storefront,
        guardrails,
        reputation,
    ));

    let registry_handle: Arc<dyn AgentRegistry> = registry;
    let app_state = state::AppState {
        tokens: tokens.clone(),
        registry: registry_handle,
        mcp,
        started_at: Utc::now(),
    };

    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::tokens::issue_router().layer(middleware::rate_limit::token_issue_layer()))
        .merge(routes::tokens::introspect_router())
        .merge(routes::mcp_http::router())
        .layer(middleware::access_gate::AccessGateLayer::new(
            tokens, limiter, blocklist,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Gatehouse API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("serve");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_specs_parse_permissions_and_skip_malformed_entries() {
        let specs = parse_agent_specs(
            "anthropic:shopper:s3cret:read|execute, openai:browser:k3y:read, broken-entry",
        );
        assert_eq!(specs.len(), 2);

        let (identity, secret, permissions) = &specs[0];
        assert_eq!(identity.provider, "anthropic");
        assert_eq!(identity.name, "shopper");
        assert_eq!(secret, "s3cret");
        assert_eq!(permissions, &vec![Permission::Read, Permission::Execute]);
    }

    #[test]
    fn empty_agent_spec_yields_nothing() {
        assert!(parse_agent_specs("").is_empty());
        assert!(parse_agent_specs(" , ,").is_empty());
    }
}
