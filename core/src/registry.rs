//! Agent identities and the registry boundary.
//!
//! The registry is a consumed collaborator: the gateway only needs
//! credential lookup and permission resolution, so the trait is narrow
//! and "not found" / "unavailable" are first-class recoverable errors.
//! The in-memory implementation backs tests and single-process deploys;
//! a persistent store can be swapped in without touching call sites.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::permissions::Permission;

/// A registered machine caller. Immutable after registration except for
/// `capabilities`; never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AgentIdentity {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Registry row: identity plus credential digest and granted permissions.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub identity: AgentIdentity,
    pub secret_hash: String,
    pub permissions: Vec<Permission>,
    pub active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found")]
    NotFound,
    #[error("agent registry unavailable: {0}")]
    Unavailable(String),
}

/// Narrow lookup interface the gateway consumes.
pub trait AgentRegistry: Send + Sync {
    fn find_by_id(&self, agent_id: Uuid) -> Result<AgentRecord, RegistryError>;
    fn find_by_name(&self, provider: &str, name: &str) -> Result<AgentRecord, RegistryError>;
}

/// SHA-256 hex digest of an agent secret. Secrets are never stored raw.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret against a stored digest.
pub fn verify_secret(record: &AgentRecord, secret: &str) -> bool {
    hash_secret(secret) == record.secret_hash
}

/// Default permission set for identities with no explicit grant.
pub fn default_permissions() -> Vec<Permission> {
    vec![Permission::Read]
}

/// In-memory registry keyed by agent id with a provider+name index.
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<Uuid, AgentRecord>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity with its secret and permission grant.
    /// An empty grant falls back to the minimal `{read}` set.
    pub fn register(
        &self,
        identity: AgentIdentity,
        secret: &str,
        permissions: Vec<Permission>,
    ) -> Uuid {
        let permissions = if permissions.is_empty() {
            default_permissions()
        } else {
            permissions
        };
        let id = identity.id;
        let record = AgentRecord {
            identity,
            secret_hash: hash_secret(secret),
            permissions,
            active: true,
        };
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.insert(id, record);
        id
    }

    /// Deactivate an agent. The record stays for audit; lookups treat it
    /// as not found so no new credentials can be exchanged.
    pub fn deactivate(&self, agent_id: Uuid) -> bool {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        match agents.get_mut(&agent_id) {
            Some(record) => {
                record.active = false;
                true
            }
            None => false,
        }
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn find_by_id(&self, agent_id: Uuid) -> Result<AgentRecord, RegistryError> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .get(&agent_id)
            .filter(|record| record.active)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    fn find_by_name(&self, provider: &str, name: &str) -> Result<AgentRecord, RegistryError> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .values()
            .find(|record| {
                record.active
                    && record.identity.provider.eq_ignore_ascii_case(provider)
                    && record.identity.name.eq_ignore_ascii_case(name)
            })
            .cloned()
            .ok_or(RegistryError::NotFound)
    }
}
