//! The access gate: every inbound request passes through here before any
//! handler runs.
//!
//! Pipeline, short-circuiting on the first failure:
//! 1. blocklist match on the declared client identity → 403
//! 2. fixed-window rate check on `ip:agent` → 429
//! 3. protected path without a credential → 401
//! 4. credential verification → 401 with the verifier's code
//! 5. trusted context injection (request id, timestamp, client address,
//!    verified agent — never the caller-supplied `X-Agent-ID` header)
//! 6. `X-RateLimit-*` headers on the response whatever the outcome
//!
//! Every rejection is terminal and wears the uniform failure envelope.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use regex::Regex;
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use gatehouse_core::error::{ApiEnvelope, ResponseMeta, codes};
use gatehouse_core::ratelimit::{FixedWindowLimiter, RateDecision, composite_key};
use gatehouse_core::token::{TokenClaims, TokenService};

use crate::error::AppError;

/// Trusted per-request metadata injected once the gate passes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
    pub client_ip: String,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Present on every gated request; mint a fallback for routes wired
        // without the gate so handlers never fail on context alone.
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext {
                request_id: Uuid::now_v7().to_string(),
                received_at: Utc::now(),
                client_ip: "unknown".to_string(),
            }))
    }
}

/// Verified agent identity derived from token claims. Distinct from any
/// caller-supplied agent-id header, which stays untrusted.
#[derive(Debug, Clone)]
pub struct VerifiedAgent {
    pub claims: TokenClaims,
}

impl<S: Send + Sync> FromRequestParts<S> for VerifiedAgent {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The gate inserts this after verification. Absence means the route
        // was reached without a verified token; fail closed.
        parts
            .extensions
            .get::<VerifiedAgent>()
            .cloned()
            .ok_or(AppError::Unauthorized {
                code: codes::TOKEN_REQUIRED,
                message: "This endpoint requires an agent token".to_string(),
            })
    }
}

/// Compiled blocklist over declared client identity strings.
pub struct Blocklist {
    patterns: Vec<Regex>,
}

impl Blocklist {
    pub fn from_patterns<I: IntoIterator<Item = String>>(patterns: I) -> Self {
        let patterns = patterns
            .into_iter()
            .filter_map(|raw| match Regex::new(&raw) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(pattern = %raw, error = %err, "skipping invalid blocklist pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Comma-separated patterns from `GATEHOUSE_BLOCKLIST`.
    pub fn from_env() -> Self {
        let raw = std::env::var("GATEHOUSE_BLOCKLIST").unwrap_or_default();
        Self::from_patterns(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned),
        )
    }

    pub fn matches(&self, identity: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(identity))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Clone)]
pub struct AccessGateLayer {
    tokens: Arc<TokenService>,
    limiter: Arc<FixedWindowLimiter>,
    blocklist: Arc<Blocklist>,
}

impl AccessGateLayer {
    pub fn new(
        tokens: Arc<TokenService>,
        limiter: Arc<FixedWindowLimiter>,
        blocklist: Arc<Blocklist>,
    ) -> Self {
        Self {
            tokens,
            limiter,
            blocklist,
        }
    }
}

impl<S> Layer<S> for AccessGateLayer {
    type Service = AccessGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessGateService {
            inner,
            tokens: self.tokens.clone(),
            limiter: self.limiter.clone(),
            blocklist: self.blocklist.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessGateService<S> {
    inner: S,
    tokens: Arc<TokenService>,
    limiter: Arc<FixedWindowLimiter>,
    blocklist: Arc<Blocklist>,
}

impl<S> Service<Request> for AccessGateService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let tokens = self.tokens.clone();
        let limiter = self.limiter.clone();
        let blocklist = self.blocklist.clone();

        Box::pin(async move {
            let request_id = Uuid::now_v7().to_string();
            let received_at = Utc::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let client_ip = client_ip(&req);

            // 1. Blocklist on what the caller claims to be.
            let declared_identity = declared_client_identity(req.headers());
            if !blocklist.is_empty() && blocklist.matches(&declared_identity) {
                tracing::warn!(
                    request_id = %request_id,
                    client_ip = %client_ip,
                    identity = %declared_identity,
                    "blocked client identity"
                );
                return Ok(reject(
                    StatusCode::FORBIDDEN,
                    codes::AGENT_BLOCKED,
                    "This client identity is not allowed to call the gateway".to_string(),
                    &request_id,
                    None,
                ));
            }

            // 2. Rate check on the composite caller key. The agent part is
            // the caller's declared id; it partitions quota, never authz.
            let declared_agent = header_value(req.headers(), "x-agent-id");
            let key = composite_key(&client_ip, declared_agent.as_deref());
            let decision = limiter.check(&key);
            if !decision.allowed {
                tracing::warn!(
                    request_id = %request_id,
                    key = %key,
                    count = decision.count,
                    "rate limit exceeded"
                );
                return Ok(reject(
                    StatusCode::TOO_MANY_REQUESTS,
                    codes::RATE_LIMIT_EXCEEDED,
                    format!(
                        "Rate limit exceeded; window resets at {}",
                        decision.window_reset_at.to_rfc3339()
                    ),
                    &request_id,
                    Some(&decision),
                ));
            }

            // 3 + 4. Credential requirements for protected paths.
            let credential = extract_credential(req.headers());
            match credential {
                Some(token) => match tokens.verify(&token) {
                    Ok(claims) => {
                        req.extensions_mut().insert(VerifiedAgent { claims });
                    }
                    Err(err) => {
                        tracing::info!(
                            request_id = %request_id,
                            client_ip = %client_ip,
                            code = err.code(),
                            "token verification failed"
                        );
                        return Ok(reject(
                            StatusCode::UNAUTHORIZED,
                            err.code(),
                            err.to_string(),
                            &request_id,
                            Some(&decision),
                        ));
                    }
                },
                None if is_protected(&method, &path) => {
                    return Ok(reject(
                        StatusCode::UNAUTHORIZED,
                        codes::TOKEN_REQUIRED,
                        "This endpoint requires an agent token".to_string(),
                        &request_id,
                        Some(&decision),
                    ));
                }
                None => {}
            }

            // 5. Trusted context for handlers and logs.
            req.extensions_mut().insert(RequestContext {
                request_id,
                received_at,
                client_ip,
            });

            // 6. Quota headers on the way out, whatever the handler did.
            let mut response = ready.oneshot(req).await.into_response();
            attach_rate_headers(&mut response, &decision);
            Ok(response)
        })
    }
}

/// Protected: the agent namespace minus its explicitly public paths, plus
/// the JSON-RPC endpoint itself. `GET /mcp` stays public so clients can
/// discover capabilities before authenticating.
fn is_protected(method: &Method, path: &str) -> bool {
    if path == "/mcp" {
        return *method == Method::POST;
    }
    if let Some(rest) = path.strip_prefix("/v1/agent") {
        return !matches!(rest, "/info" | "/token");
    }
    false
}

/// Bearer token from `Authorization`, falling back to `X-Agent-Token`.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(raw) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let mut parts = raw.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().unwrap_or_default().trim();
        if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
            return Some(token.to_string());
        }
    }
    header_value(headers, "x-agent-token").filter(|token| !token.trim().is_empty())
}

/// What the caller claims to be: user agent plus any declared agent id.
fn declared_client_identity(headers: &HeaderMap) -> String {
    let user_agent = header_value(headers, "user-agent").unwrap_or_default();
    match header_value(headers, "x-agent-id") {
        Some(agent_id) => format!("{user_agent} {agent_id}"),
        None => user_agent,
    }
}

fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = first_header_token(req.headers(), "x-forwarded-for") {
        return forwarded;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

fn reject(
    status: StatusCode,
    code: &str,
    message: String,
    request_id: &str,
    decision: Option<&RateDecision>,
) -> Response {
    let envelope = ApiEnvelope::fail(code, message, ResponseMeta::new(request_id));
    let mut response = (status, Json(envelope)).into_response();
    if let Some(decision) = decision {
        attach_rate_headers(&mut response, decision);
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = (decision.window_reset_at - Utc::now()).num_seconds().max(1);
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
    }
    response
}

fn attach_rate_headers(response: &mut Response, decision: &RateDecision) {
    if let Ok(value) = HeaderValue::from_str(&decision.remaining().to_string()) {
        response.headers_mut().insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.window_reset_at.timestamp().to_string()) {
        response.headers_mut().insert("x-ratelimit-reset", value);
    }
}
