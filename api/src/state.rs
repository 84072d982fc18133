use std::sync::Arc;

use chrono::{DateTime, Utc};

use gatehouse_core::registry::AgentRegistry;
use gatehouse_core::token::TokenService;
use gatehouse_mcp_runtime::McpServer;

/// Shared handles injected into every handler. All stores are constructed
/// in `main` and passed down; nothing here is a module-level singleton.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub registry: Arc<dyn AgentRegistry>,
    pub mcp: Arc<McpServer>,
    pub started_at: DateTime<Utc>,
}
