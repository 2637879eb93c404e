use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use quorum_models::agent::{AgentInfo, AgentRecord, AgentStatus};
use quorum_models::status::AgentStatusView;
use tokio::sync::RwLock;

/// Known agents keyed by id. Stale agents stay registered; only
/// [`AgentRegistry::remove`] deletes a record.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
    liveness: chrono::Duration,
}

impl AgentRegistry {
    pub fn new(liveness_threshold: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            liveness: chrono::Duration::from_std(liveness_threshold)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn liveness_threshold(&self) -> chrono::Duration {
        self.liveness
    }

    /// Insert or overwrite. Returns true if an earlier record was replaced.
    pub async fn upsert(&self, info: AgentInfo, now: DateTime<Utc>) -> bool {
        let id = info.id.clone();
        self.agents
            .write()
            .await
            .insert(id, AgentRecord::from_info(info, now))
            .is_some()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.agents.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<AgentRecord> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.agents.read().await.contains_key(id)
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Returns false for an agent that never registered.
    pub async fn record_heartbeat(
        &self,
        id: &str,
        status: AgentStatus,
        performance: Option<BTreeMap<String, f64>>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(id) else {
            return false;
        };
        record.status = status;
        record.last_heartbeat = now;
        if let Some(performance) = performance {
            record.performance = performance;
        }
        true
    }

    /// Merge metrics into the performance map. Telemetry also counts as a sign of life.
    pub async fn record_telemetry(
        &self,
        id: &str,
        metrics: BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(id) else {
            return false;
        };
        record.performance.extend(metrics);
        record.last_heartbeat = now;
        true
    }

    pub async fn record_response_latency(&self, id: &str, latency_ms: u64) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(record) => {
                record.last_response_ms = Some(latency_ms);
                true
            }
            None => false,
        }
    }

    pub async fn status_views(&self, now: DateTime<Utc>) -> Vec<AgentStatusView> {
        let agents = self.agents.read().await;
        let mut views: Vec<AgentStatusView> = agents
            .values()
            .map(|record| AgentStatusView {
                id: record.id.clone(),
                name: record.name.clone(),
                status: record.status,
                responsive: record.is_responsive(now, self.liveness),
                last_heartbeat: record.last_heartbeat,
                heartbeat_age_seconds: record.heartbeat_age(now).num_seconds(),
                capabilities: record.capabilities.clone(),
                last_response_ms: record.last_response_ms,
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Agents whose last heartbeat is older than the liveness threshold.
    pub async fn stale_agents(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut stale: Vec<String> = self
            .agents
            .read()
            .await
            .values()
            .filter(|record| !record.is_responsive(now, self.liveness))
            .map(|record| record.id.clone())
            .collect();
        stale.sort();
        stale
    }
}
