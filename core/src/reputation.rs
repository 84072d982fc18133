//! Agent reputation scores and trust tiers.
//!
//! A score in `[0, 1000]` maps deterministically to a tier. The store is
//! read-mostly from the gateway's point of view: usage signals elsewhere
//! mutate it asynchronously, the guardrail engine only reads. A missing
//! or unavailable store degrades to the conservative `New` tier; callers
//! surface that degradation rather than hiding it.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score ceiling. Scores are clamped, never rejected.
pub const MAX_SCORE: u32 = 1000;

/// Score granted to agents with no recorded history.
pub const DEFAULT_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationLevel {
    New,
    Basic,
    Trusted,
    Verified,
    Elite,
}

impl ReputationLevel {
    /// Tier thresholds: >=900 elite, >=700 verified, >=500 trusted,
    /// >=300 basic, else new.
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 900 => ReputationLevel::Elite,
            s if s >= 700 => ReputationLevel::Verified,
            s if s >= 500 => ReputationLevel::Trusted,
            s if s >= 300 => ReputationLevel::Basic,
            _ => ReputationLevel::New,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReputationLevel::New => "new",
            ReputationLevel::Basic => "basic",
            ReputationLevel::Trusted => "trusted",
            ReputationLevel::Verified => "verified",
            ReputationLevel::Elite => "elite",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub agent_id: Uuid,
    pub score: u32,
    pub violations: u32,
}

impl ReputationRecord {
    pub fn new(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            score: DEFAULT_SCORE,
            violations: 0,
        }
    }

    pub fn level(&self) -> ReputationLevel {
        ReputationLevel::from_score(self.score)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("reputation store unavailable: {0}")]
    Unavailable(String),
}

/// Read/record interface the guardrail engine consumes.
pub trait ReputationStore: Send + Sync {
    /// Fetch an agent's record; unknown agents get a default `New`-tier
    /// record rather than an error.
    fn get(&self, agent_id: Uuid) -> Result<ReputationRecord, ReputationError>;

    /// Record one guardrail violation against an agent.
    fn record_violation(&self, agent_id: Uuid) -> Result<(), ReputationError>;

    /// Apply a score delta (positive or negative), clamped to `[0, 1000]`.
    fn adjust_score(&self, agent_id: Uuid, delta: i32) -> Result<(), ReputationError>;
}

#[derive(Default)]
pub struct InMemoryReputationStore {
    records: RwLock<HashMap<Uuid, ReputationRecord>>,
}

impl InMemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: ReputationRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.agent_id, record);
    }
}

impl ReputationStore for InMemoryReputationStore {
    fn get(&self, agent_id: Uuid) -> Result<ReputationRecord, ReputationError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&agent_id)
            .cloned()
            .unwrap_or_else(|| ReputationRecord::new(agent_id)))
    }

    fn record_violation(&self, agent_id: Uuid) -> Result<(), ReputationError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(agent_id)
            .or_insert_with(|| ReputationRecord::new(agent_id));
        record.violations = record.violations.saturating_add(1);
        Ok(())
    }

    fn adjust_score(&self, agent_id: Uuid, delta: i32) -> Result<(), ReputationError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(agent_id)
            .or_insert_with(|| ReputationRecord::new(agent_id));
        let next = record.score as i64 + delta as i64;
        record.score = next.clamp(0, MAX_SCORE as i64) as u32;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_are_exact() {
        assert_eq!(ReputationLevel::from_score(1000), ReputationLevel::Elite);
        assert_eq!(ReputationLevel::from_score(900), ReputationLevel::Elite);
        assert_eq!(ReputationLevel::from_score(899), ReputationLevel::Verified);
        assert_eq!(ReputationLevel::from_score(700), ReputationLevel::Verified);
        assert_eq!(ReputationLevel::from_score(500), ReputationLevel::Trusted);
        assert_eq!(ReputationLevel::from_score(300), ReputationLevel::Basic);
        assert_eq!(ReputationLevel::from_score(299), ReputationLevel::New);
        assert_eq!(ReputationLevel::from_score(0), ReputationLevel::New);
    }

    #[test]
    fn unknown_agents_get_a_default_record() {
        let store = InMemoryReputationStore::new();
        let record = store.get(Uuid::now_v7()).unwrap();
        assert_eq!(record.score, DEFAULT_SCORE);
        assert_eq!(record.level(), ReputationLevel::New);
        assert_eq!(record.violations, 0);
    }

    #[test]
    fn score_adjustments_clamp_to_bounds() {
        let store = InMemoryReputationStore::new();
        let agent = Uuid::now_v7();
        store.adjust_score(agent, 5000).unwrap();
        assert_eq!(store.get(agent).unwrap().score, MAX_SCORE);
        store.adjust_score(agent, -9000).unwrap();
        assert_eq!(store.get(agent).unwrap().score, 0);
    }

    #[test]
    fn violations_accumulate() {
        let store = InMemoryReputationStore::new();
        let agent = Uuid::now_v7();
        store.record_violation(agent).unwrap();
        store.record_violation(agent).unwrap();
        assert_eq!(store.get(agent).unwrap().violations, 2);
    }
}
