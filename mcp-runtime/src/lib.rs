//! JSON-RPC 2.0 (MCP) dispatcher for the Gatehouse gateway.
//!
//! The server accepts a single request object or a batch array and routes
//! by method name: session initialization, tool listing and invocation,
//! resource listing/reading, and prompt listing/retrieval. Each batch
//! entry is handled independently; one malformed entry never aborts the
//! rest. No per-connection state is required between calls — every call
//! is self-contained given a verified caller identity.
//!
//! Risky invocations pass through three gates before a side effect
//! commits: the coarse permission check, the confirmation gate, and the
//! guardrail engine. The action sandbox is exposed through the same
//! surface as a `simulate_action` tool.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use gatehouse_core::actions::ActionCatalog;
use gatehouse_core::error::codes;
use gatehouse_core::guardrails::{GuardrailContext, GuardrailEngine};
use gatehouse_core::permissions::{Permission, has_permission, has_scope};
use gatehouse_core::reputation::{ReputationRecord, ReputationStore};
use gatehouse_core::sandbox;

pub mod storefront;

pub use storefront::{ActionExecutor, Storefront};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "gatehouse-mcp";

/// Meta-tool exposing the action sandbox over the protocol surface.
const SIMULATE_TOOL: &str = "simulate_action";

const RESOURCE_URI_SCHEME: &str = "gatehouse";
const PRODUCTS_RESOURCE_URI: &str = "gatehouse://catalog/products";
const ACTIONS_RESOURCE_URI: &str = "gatehouse://gateway/actions";

/// Verified caller identity, produced by the access gate from token
/// claims. Never built from caller-supplied headers.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub agent_id: Uuid,
    pub provider: String,
    pub permissions: Vec<Permission>,
    pub scopes: Vec<String>,
}

// ──────────────────────────────────────────────
// JSON-RPC plumbing
// ──────────────────────────────────────────────

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// Server-defined code for authorization failures (JSON-RPC reserves
/// -32000..-32099 for implementations).
const RPC_AUTHORIZATION_DENIED: i64 = -32001;

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: Some(json!({ "method": method })),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    fn permission_denied(tool: &str, required: Permission) -> Self {
        Self {
            code: RPC_AUTHORIZATION_DENIED,
            message: format!("Permission denied: '{tool}' requires {required}"),
            data: Some(json!({
                "code": codes::PERMISSION_DENIED,
                "required_permission": required.as_str(),
            })),
        }
    }

    fn scope_denied(tool: &str, required_scope: &str) -> Self {
        Self {
            code: RPC_AUTHORIZATION_DENIED,
            message: format!("Scope denied: '{tool}' requires scope '{required_scope}'"),
            data: Some(json!({
                "code": codes::SCOPE_DENIED,
                "required_scope": required_scope,
            })),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Wrap a tool outcome as MCP text content plus structured payload.
fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string());
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

// ──────────────────────────────────────────────
// Resource and prompt surfaces
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ResourceDefinition {
    uri: &'static str,
    name: &'static str,
    description: &'static str,
    mime_type: &'static str,
}

const RESOURCES: &[ResourceDefinition] = &[
    ResourceDefinition {
        uri: PRODUCTS_RESOURCE_URI,
        name: "Product catalog snapshot",
        description: "Read-only snapshot of the storefront catalog with live stock levels.",
        mime_type: "application/json",
    },
    ResourceDefinition {
        uri: ACTIONS_RESOURCE_URI,
        name: "Action policy summary",
        description: "Every gateway action with its required permission and confirmation policy.",
        mime_type: "application/json",
    },
];

#[derive(Debug, Clone)]
struct PromptArgument {
    name: &'static str,
    description: &'static str,
    required: bool,
}

#[derive(Debug, Clone)]
struct PromptDefinition {
    name: &'static str,
    description: &'static str,
    arguments: &'static [PromptArgument],
}

const PROMPTS: &[PromptDefinition] = &[
    PromptDefinition {
        name: "product_discovery",
        description: "Guide an agent through narrowing the catalog to a shortlist.",
        arguments: &[PromptArgument {
            name: "interests",
            description: "Comma-separated interests or keywords",
            required: true,
        }],
    },
    PromptDefinition {
        name: "order_checkout",
        description: "Walk an agent through simulating and then confirming a purchase.",
        arguments: &[
            PromptArgument {
                name: "product_id",
                description: "Catalog product id to purchase",
                required: true,
            },
            PromptArgument {
                name: "quantity",
                description: "Units to purchase (defaults to 1)",
                required: false,
            },
        ],
    },
];

// ──────────────────────────────────────────────
// The server
// ──────────────────────────────────────────────

/// Protocol dispatcher. Stores are injected at construction so a
/// different catalog, rule set, or backing store never touches call sites.
pub struct McpServer {
    catalog: ActionCatalog,
    executor: Arc<dyn ActionExecutor>,
    guardrails: Arc<GuardrailEngine>,
    reputation: Arc<dyn ReputationStore>,
}

impl McpServer {
    pub fn new(
        catalog: ActionCatalog,
        executor: Arc<dyn ActionExecutor>,
        guardrails: Arc<GuardrailEngine>,
        reputation: Arc<dyn ReputationStore>,
    ) -> Self {
        Self {
            catalog,
            executor,
            guardrails,
            reputation,
        }
    }

    /// Handle one incoming message: a single request object or a batch
    /// array. Returns zero or more response values (notifications produce
    /// none).
    pub async fn handle_incoming(&self, caller: &CallerIdentity, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single(caller, item.clone()) {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single(caller, incoming) {
            responses.push(response);
        }
        responses
    }

    fn handle_single(&self, caller: &CallerIdentity, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Most likely a client response; this server issues no
            // outbound requests, so there is nothing to correlate.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(caller, method, params);
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method);
            None
        }
    }

    fn handle_notification(&self, method: &str) {
        if !matches!(method, "notifications/initialized" | "notifications/cancelled") {
            tracing::debug!(method, "ignoring unknown notification");
        }
    }

    fn handle_request(
        &self,
        caller: &CallerIdentity,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload(caller)),
            "tools/call" => self.handle_tools_call(caller, params),
            "resources/list" => Ok(resources_list_payload()),
            "resources/read" => self.handle_resources_read(params),
            "prompts/list" => Ok(prompts_list_payload()),
            "prompts/get" => handle_prompts_get(params),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": format!(
                "Tools that commit side effects require arguments.confirmed = true. \
                 Use {SIMULATE_TOOL} to preview cost and side effects before confirming."
            )
        })
    }

    fn tools_list_payload(&self, caller: &CallerIdentity) -> Value {
        let mut tools: Vec<Value> = self
            .catalog
            .visible_to(&caller.permissions)
            .into_iter()
            .map(|action| {
                json!({
                    "name": action.name,
                    "description": action.description,
                    "inputSchema": action.input_schema(),
                })
            })
            .collect();
        tools.push(json!({
            "name": SIMULATE_TOOL,
            "description": "Dry-run any action: predicts success, estimated cost, and side effects without committing anything.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Action to simulate" },
                    "arguments": { "type": "object", "description": "Arguments the action would receive" }
                },
                "required": ["name"]
            }
        }));
        json!({ "tools": tools })
    }

    fn handle_tools_call(
        &self,
        caller: &CallerIdentity,
        params: Value,
    ) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        if name == SIMULATE_TOOL {
            return self.handle_simulate(&args);
        }

        let action = self
            .catalog
            .find(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {name}")))?;

        if !has_permission(&caller.permissions, action.required_permission) {
            tracing::warn!(
                agent_id = %caller.agent_id,
                tool = name,
                required = %action.required_permission,
                decision = "deny",
                "tool authorization decision"
            );
            return Err(RpcError::permission_denied(name, action.required_permission));
        }

        let required_scope = format!("tools:{name}");
        if !has_scope(&caller.scopes, &required_scope) {
            tracing::warn!(
                agent_id = %caller.agent_id,
                tool = name,
                required_scope = %required_scope,
                decision = "deny",
                "tool scope decision"
            );
            return Err(RpcError::scope_denied(name, &required_scope));
        }

        let confirmed = args
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Dispatcher-level confirmation gate fires before any quota or
        // side effect is touched.
        if action.confirmation_required && !confirmed {
            return Ok(confirmation_needed_response(name, false));
        }

        let arguments = Value::Object(args.clone());
        let (reputation, degraded) = self.lookup_reputation(caller.agent_id);
        let decision = self.guardrails.evaluate(
            action,
            &GuardrailContext {
                agent_id: caller.agent_id,
                reputation: &reputation,
                arguments: &arguments,
            },
        );

        if !decision.allow {
            let _ = self.reputation.record_violation(caller.agent_id);
            let mut envelope = json!({
                "error": {
                    "code": codes::GUARDRAIL_DENIED,
                    "message": decision
                        .reason
                        .unwrap_or_else(|| "blocked by guardrail policy".to_string()),
                }
            });
            if degraded {
                envelope["degraded"] = Value::Bool(true);
            }
            return Ok(build_tool_call_response(envelope, true));
        }

        // Guardrail-configured confirmation, mirroring the gate above.
        if decision.requires_confirmation && !confirmed {
            return Ok(confirmation_needed_response(
                name,
                decision.recommend_simulation,
            ));
        }

        match self.executor.execute(caller.agent_id, action, &args) {
            Ok(result) => {
                let mut envelope = json!({
                    "status": "ok",
                    "action": name,
                    "result": result,
                });
                if decision.recommend_simulation && !confirmed {
                    envelope["simulation_recommended"] = Value::Bool(true);
                }
                if degraded {
                    envelope["degraded"] = Value::Bool(true);
                }
                Ok(build_tool_call_response(envelope, false))
            }
            // A cataloged action without a handler is a server defect, not
            // a tool-level failure the caller can fix.
            Err(err @ storefront::ExecuteError::Unhandled(_)) => {
                tracing::error!(tool = name, "executor has no handler for cataloged action");
                Err(RpcError::internal(err.to_string()))
            }
            Err(err) => Ok(build_tool_call_response(
                json!({
                    "error": {
                        "code": err.code(),
                        "message": err.to_string(),
                    }
                }),
                true,
            )),
        }
    }

    fn handle_simulate(&self, args: &Map<String, Value>) -> Result<Value, RpcError> {
        let target = args.get("name").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params(format!("{SIMULATE_TOOL} requires string field 'name'"))
        })?;
        let sim_args = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let action = self
            .catalog
            .find(target)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {target}")))?;

        let report = sandbox::simulate(action, &sim_args);
        Ok(build_tool_call_response(
            json!({
                "status": "simulated",
                "report": report,
            }),
            false,
        ))
    }

    fn handle_resources_read(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("resources/read params must be an object"))?;
        let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params("resources/read requires string field 'uri'")
        })?;

        let parsed = url::Url::parse(uri)
            .map_err(|_| RpcError::invalid_params(format!("Invalid resource URI: {uri}")))?;
        if parsed.scheme() != RESOURCE_URI_SCHEME {
            return Err(RpcError::invalid_params(format!(
                "Resource URIs use the {RESOURCE_URI_SCHEME}:// scheme"
            )));
        }

        let body = match uri {
            PRODUCTS_RESOURCE_URI => self.executor.catalog_snapshot(),
            ACTIONS_RESOURCE_URI => self.actions_summary(),
            _ => return Err(RpcError::invalid_params(format!("Unknown resource URI: {uri}"))),
        };

        let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": text,
            }]
        }))
    }

    fn actions_summary(&self) -> Value {
        let actions: Vec<Value> = self
            .catalog
            .all()
            .iter()
            .map(|action| {
                json!({
                    "name": action.name,
                    "category": action.category.as_str(),
                    "required_permission": action.required_permission.as_str(),
                    "confirmation_required": action.confirmation_required,
                    "enabled": action.enabled,
                })
            })
            .collect();
        json!({ "actions": actions })
    }

    /// Reputation lookup with graceful degradation: an unavailable store
    /// yields the conservative default record plus a visible flag, never
    /// a failed request.
    fn lookup_reputation(&self, agent_id: Uuid) -> (ReputationRecord, bool) {
        match self.reputation.get(agent_id) {
            Ok(record) => (record, false),
            Err(err) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    error = %err,
                    "reputation store unavailable; using conservative default"
                );
                (ReputationRecord::new(agent_id), true)
            }
        }
    }
}

fn confirmation_needed_response(name: &str, recommend_simulation: bool) -> Value {
    let mut envelope = json!({
        "status": "confirmation_required",
        "action": name,
        "message": format!(
            "'{name}' commits a side effect. Call again with arguments.confirmed = true to proceed."
        ),
    });
    if recommend_simulation {
        envelope["simulation_recommended"] = Value::Bool(true);
    }
    build_tool_call_response(envelope, false)
}

fn resources_list_payload() -> Value {
    let resources: Vec<Value> = RESOURCES
        .iter()
        .map(|r| {
            json!({
                "uri": r.uri,
                "name": r.name,
                "description": r.description,
                "mimeType": r.mime_type,
            })
        })
        .collect();
    json!({ "resources": resources })
}

fn prompts_list_payload() -> Value {
    let prompts: Vec<Value> = PROMPTS
        .iter()
        .map(|p| {
            let arguments: Vec<Value> = p
                .arguments
                .iter()
                .map(|a| {
                    json!({
                        "name": a.name,
                        "description": a.description,
                        "required": a.required,
                    })
                })
                .collect();
            json!({
                "name": p.name,
                "description": p.description,
                "arguments": arguments,
            })
        })
        .collect();
    json!({ "prompts": prompts })
}

fn handle_prompts_get(params: Value) -> Result<Value, RpcError> {
    let params = params
        .as_object()
        .ok_or_else(|| RpcError::invalid_params("prompts/get params must be an object"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
    let arguments = params
        .get("arguments")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let prompt = PROMPTS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt: {name}")))?;

    for arg in prompt.arguments.iter().filter(|a| a.required) {
        if !arguments.contains_key(arg.name) {
            return Err(RpcError::invalid_params(format!(
                "prompts/get '{name}' requires argument '{}'",
                arg.name
            )));
        }
    }

    let text = match prompt.name {
        "product_discovery" => {
            let interests = arguments
                .get("interests")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!(
                "You are shopping on behalf of a user interested in: {interests}. \
                 Use search_products to build a shortlist of at most three items, \
                 then present them with prices and stock levels."
            )
        }
        "order_checkout" => {
            let product_id = arguments
                .get("product_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let quantity = arguments
                .get("quantity")
                .and_then(Value::as_str)
                .unwrap_or("1");
            format!(
                "Purchase {quantity} unit(s) of product {product_id}. First call \
                 {SIMULATE_TOOL} to preview cost and side effects, report the result, \
                 and only then call create_order with confirmed set to true."
            )
        }
        _ => String::new(),
    };

    Ok(json!({
        "description": prompt.description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text }
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::actions::default_catalog;
    use gatehouse_core::guardrails::{GuardrailKind, GuardrailRule};
    use gatehouse_core::reputation::{InMemoryReputationStore, ReputationError};

    fn caller(permissions: Vec<Permission>) -> CallerIdentity {
        CallerIdentity {
            agent_id: Uuid::now_v7(),
            provider: "anthropic".to_string(),
            permissions,
            scopes: vec!["*".to_string()],
        }
    }

    fn server_with(rules: Vec<GuardrailRule>) -> (McpServer, Arc<Storefront>) {
        let storefront = Arc::new(Storefront::with_demo_inventory());
        let server = McpServer::new(
            default_catalog(),
            storefront.clone(),
            Arc::new(GuardrailEngine::new(rules)),
            Arc::new(InMemoryReputationStore::new()),
        );
        (server, storefront)
    }

    fn server() -> (McpServer, Arc<Storefront>) {
        server_with(Vec::new())
    }

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    async fn call_one(server: &McpServer, caller: &CallerIdentity, req: Value) -> Value {
        let mut responses = server.handle_incoming(caller, req).await;
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_identity() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(1, "initialize", json!({})),
        )
        .await;
        assert_eq!(response["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], MCP_SERVER_NAME);
    }

    #[tokio::test]
    async fn tools_list_is_filtered_by_permission() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(1, "tools/list", json!({})),
        )
        .await;
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"search_products"));
        assert!(names.contains(&SIMULATE_TOOL));
        assert!(!names.contains(&"create_order"));

        let response = call_one(
            &server,
            &caller(vec![Permission::Execute]),
            request(2, "tools/list", json!({})),
        )
        .await;
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"create_order"));
    }

    #[tokio::test]
    async fn tools_call_executes_and_wraps_text_content() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(
                7,
                "tools/call",
                json!({ "name": "search_products", "arguments": { "query": "lamp" } }),
            ),
        )
        .await;
        assert_eq!(response["id"], 7);
        let result = &response["result"];
        assert_eq!(result["structuredContent"]["status"], "ok");
        assert_eq!(result["content"][0]["type"], "text");
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn batch_entries_are_isolated() {
        let (server, _) = server();
        let batch = json!([
            request(1, "tools/list", json!({})),
            { "jsonrpc": "1.0", "id": 2, "method": "x" },
        ]);
        let responses = server
            .handle_incoming(&caller(vec![Permission::Read]), batch)
            .await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0]["result"]["tools"].is_array());
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn empty_batch_is_an_invalid_request() {
        let (server, _) = server();
        let responses = server
            .handle_incoming(&caller(vec![Permission::Read]), json!([]))
            .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32600);
        assert!(responses[0]["id"].is_null());
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let (server, _) = server();
        let batch = json!([
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            request(5, "ping", json!({})),
        ]);
        let responses = server
            .handle_incoming(&caller(vec![Permission::Read]), batch)
            .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 5);
    }

    #[tokio::test]
    async fn unknown_method_carries_name_in_error_data() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(3, "tools/destroy", json!({})),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"]["method"], "tools/destroy");
    }

    #[tokio::test]
    async fn non_object_batch_entry_is_rejected_alone() {
        let (server, _) = server();
        let batch = json!([request(1, "ping", json!({})), 42]);
        let responses = server
            .handle_incoming(&caller(vec![Permission::Read]), batch)
            .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unconfirmed_risky_call_commits_nothing() {
        let (server, storefront) = server();
        let agent = caller(vec![Permission::Execute]);
        let response = call_one(
            &server,
            &agent,
            request(
                1,
                "tools/call",
                json!({
                    "name": "create_order",
                    "arguments": { "product_id": "p-1001", "quantity": 1 }
                }),
            ),
        )
        .await;
        assert_eq!(
            response["result"]["structuredContent"]["status"],
            "confirmation_required"
        );
        assert_eq!(storefront.order_count(), 0);
        assert_eq!(storefront.stock_of("p-1001"), Some(24));

        // Same call with confirmed: true commits exactly once.
        let response = call_one(
            &server,
            &agent,
            request(
                2,
                "tools/call",
                json!({
                    "name": "create_order",
                    "arguments": { "product_id": "p-1001", "quantity": 1, "confirmed": true }
                }),
            ),
        )
        .await;
        assert_eq!(response["result"]["structuredContent"]["status"], "ok");
        assert_eq!(storefront.order_count(), 1);
        assert_eq!(storefront.stock_of("p-1001"), Some(23));
    }

    #[tokio::test]
    async fn insufficient_permission_is_a_protocol_error_and_no_invocation() {
        let (server, storefront) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(
                9,
                "tools/call",
                json!({
                    "name": "create_order",
                    "arguments": { "product_id": "p-1001", "quantity": 1, "confirmed": true }
                }),
            ),
        )
        .await;
        assert_eq!(response["error"]["code"], RPC_AUTHORIZATION_DENIED);
        assert_eq!(response["error"]["data"]["code"], "PERMISSION_DENIED");
        assert_eq!(response["error"]["data"]["required_permission"], "execute");
        assert_eq!(storefront.order_count(), 0);
    }

    #[tokio::test]
    async fn missing_scope_is_denied_with_required_scope() {
        let (server, _) = server();
        let mut agent = caller(vec![Permission::Read]);
        agent.scopes = vec!["resources:*".to_string()];
        let response = call_one(
            &server,
            &agent,
            request(
                1,
                "tools/call",
                json!({ "name": "search_products", "arguments": { "query": "lamp" } }),
            ),
        )
        .await;
        assert_eq!(response["error"]["data"]["code"], "SCOPE_DENIED");
        assert_eq!(
            response["error"]["data"]["required_scope"],
            "tools:search_products"
        );
    }

    #[tokio::test]
    async fn guardrail_denial_surfaces_reason_without_config() {
        let rules = vec![GuardrailRule::new(
            "quantity-ceiling",
            GuardrailKind::Limit,
            json!({"field": "quantity", "max": 10.0}),
            1,
        )];
        let (server, storefront) = server_with(rules);
        let response = call_one(
            &server,
            &caller(vec![Permission::Execute]),
            request(
                1,
                "tools/call",
                json!({
                    "name": "create_order",
                    "arguments": { "product_id": "p-1002", "quantity": 50, "confirmed": true }
                }),
            ),
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["structuredContent"]["error"]["code"],
            "GUARDRAIL_DENIED"
        );
        let message = result["structuredContent"]["error"]["message"]
            .as_str()
            .unwrap();
        assert!(message.contains("quantity"));
        assert!(!message.contains("10"), "rule config must not leak");
        assert_eq!(storefront.order_count(), 0);
    }

    #[tokio::test]
    async fn tool_failures_are_tool_errors_not_protocol_errors() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(
                1,
                "tools/call",
                json!({ "name": "get_product", "arguments": { "product_id": "p-404" } }),
            ),
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["structuredContent"]["error"]["code"],
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let (server, _) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Admin]),
            request(1, "tools/call", json!({ "name": "drop_tables", "arguments": {} })),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn simulate_tool_previews_without_committing() {
        let (server, storefront) = server();
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(
                1,
                "tools/call",
                json!({
                    "name": SIMULATE_TOOL,
                    "arguments": {
                        "name": "create_order",
                        "arguments": { "product_id": "p-1001", "quantity": 2, "amount": 89.0 }
                    }
                }),
            ),
        )
        .await;
        let report = &response["result"]["structuredContent"]["report"];
        assert_eq!(report["will_succeed"], true);
        assert_eq!(report["estimated_cost"], 178.0);
        assert!(
            report["side_effects"]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e.as_str().unwrap().contains("inventory"))
        );
        assert_eq!(storefront.order_count(), 0);
        assert_eq!(storefront.stock_of("p-1001"), Some(24));
    }

    #[tokio::test]
    async fn resources_roundtrip_and_unknown_uri_is_invalid_params() {
        let (server, _) = server();
        let agent = caller(vec![Permission::Read]);

        let listing = call_one(&server, &agent, request(1, "resources/list", json!({}))).await;
        let uris: Vec<&str> = listing["result"]["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["uri"].as_str())
            .collect();
        assert!(uris.contains(&PRODUCTS_RESOURCE_URI));

        let read = call_one(
            &server,
            &agent,
            request(2, "resources/read", json!({ "uri": PRODUCTS_RESOURCE_URI })),
        )
        .await;
        let text = read["result"]["contents"][0]["text"].as_str().unwrap();
        let snapshot: Value = serde_json::from_str(text).unwrap();
        assert_eq!(snapshot["count"], 3);

        let missing = call_one(
            &server,
            &agent,
            request(3, "resources/read", json!({ "uri": "gatehouse://catalog/unknown" })),
        )
        .await;
        assert_eq!(missing["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn prompts_roundtrip_and_required_arguments_are_enforced() {
        let (server, _) = server();
        let agent = caller(vec![Permission::Read]);

        let listing = call_one(&server, &agent, request(1, "prompts/list", json!({}))).await;
        assert_eq!(listing["result"]["prompts"].as_array().unwrap().len(), 2);

        let prompt = call_one(
            &server,
            &agent,
            request(
                2,
                "prompts/get",
                json!({ "name": "order_checkout", "arguments": { "product_id": "p-1003" } }),
            ),
        )
        .await;
        let text = prompt["result"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("p-1003"));
        assert!(text.contains(SIMULATE_TOOL));

        let missing_arg = call_one(
            &server,
            &agent,
            request(3, "prompts/get", json!({ "name": "order_checkout" })),
        )
        .await;
        assert_eq!(missing_arg["error"]["code"], -32602);

        let unknown = call_one(
            &server,
            &agent,
            request(4, "prompts/get", json!({ "name": "nope" })),
        )
        .await;
        assert_eq!(unknown["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn cataloged_action_without_handler_is_an_internal_error() {
        use gatehouse_core::actions::{ActionCategory, ActionDefinition};

        let mut actions = default_catalog().all().to_vec();
        actions.push(ActionDefinition {
            id: Uuid::now_v7(),
            name: "frobnicate".to_string(),
            description: "Operator-configured action with no executor support.".to_string(),
            required_permission: Permission::Read,
            confirmation_required: false,
            category: ActionCategory::Catalog,
            params: Vec::new(),
            enabled: true,
        });
        let server = McpServer::new(
            gatehouse_core::actions::ActionCatalog::new(actions),
            Arc::new(Storefront::with_demo_inventory()),
            Arc::new(GuardrailEngine::new(Vec::new())),
            Arc::new(InMemoryReputationStore::new()),
        );

        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(1, "tools/call", json!({ "name": "frobnicate", "arguments": {} })),
        )
        .await;
        assert_eq!(response["error"]["code"], -32603);
    }

    struct DownStore;

    impl ReputationStore for DownStore {
        fn get(&self, _agent_id: Uuid) -> Result<ReputationRecord, ReputationError> {
            Err(ReputationError::Unavailable("connection refused".to_string()))
        }
        fn record_violation(&self, _agent_id: Uuid) -> Result<(), ReputationError> {
            Err(ReputationError::Unavailable("connection refused".to_string()))
        }
        fn adjust_score(&self, _agent_id: Uuid, _delta: i32) -> Result<(), ReputationError> {
            Err(ReputationError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn unavailable_reputation_store_degrades_visibly() {
        let storefront = Arc::new(Storefront::with_demo_inventory());
        let server = McpServer::new(
            default_catalog(),
            storefront.clone(),
            Arc::new(GuardrailEngine::new(Vec::new())),
            Arc::new(DownStore),
        );
        let response = call_one(
            &server,
            &caller(vec![Permission::Read]),
            request(
                1,
                "tools/call",
                json!({ "name": "search_products", "arguments": { "query": "lamp" } }),
            ),
        )
        .await;
        assert_eq!(response["result"]["structuredContent"]["status"], "ok");
        assert_eq!(response["result"]["structuredContent"]["degraded"], true);
    }
}
