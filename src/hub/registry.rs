//! Authoritative agent directory.
//!
//! The registry owns every agent record and is the only writer. Records
//! are minted at registration (fresh 128-bit hex id per registration, so
//! ids are never reused), refreshed by control traffic, and decayed by
//! the sweeper: `online` falls to `idle` after two minutes without a
//! heartbeat and to `offline` after five, while a disconnect or control
//! socket close forces `offline` immediately. Discover never returns
//! offline records.
//!
//! The store is an in-memory map behind an `RwLock`; every mutation runs
//! under the write guard, which serialises id insertion and `last_seen`
//! updates.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::RegistrySettings;
use crate::crypto::hex_encode;
use crate::error::{FabricError, Result};
use crate::wire::{
    self, AgentStatus, AgentSummary, DiscoverPage, DiscoverQuery, FindPage,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};

/// One directory record; mutated only by the registry
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub address: String,
    /// Insertion-order-preserving for display; membership-tested by
    /// queries
    pub capabilities: Vec<String>,
    pub metadata: Map<String, Value>,
    pub status: AgentStatus,
    last_seen: Instant,
    last_seen_ms: u64,
    created_at_ms: u64,
}

impl AgentRecord {
    /// Wire form of this record
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.clone(),
            address: self.address.clone(),
            capabilities: self.capabilities.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            last_seen: self.last_seen_ms,
            created_at: self.created_at_ms,
        }
    }

    fn touch(&mut self) {
        // Instant is monotonic; the wire clock must never run backwards
        // either
        self.last_seen = Instant::now();
        self.last_seen_ms = self.last_seen_ms.max(wire::unix_millis());
    }

    fn has_any_capability(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|w| self.capabilities.contains(w))
    }
}

/// Derive the advertised address: observed remote IP plus the port
/// component of the agent-supplied address. An agent that supplies no
/// usable port gets the full observed endpoint. `trust` accepts the
/// supplied address verbatim (development only).
pub fn derive_address(observed: SocketAddr, supplied: Option<&str>, trust: bool) -> String {
    match supplied {
        Some(addr) if trust => addr.to_string(),
        Some(addr) => match addr.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()) {
            Some(port) => SocketAddr::new(observed.ip(), port).to_string(),
            None => observed.to_string(),
        },
        None => observed.to_string(),
    }
}

/// The agent directory
pub struct Registry {
    agents: RwLock<HashMap<String, AgentRecord>>,
    settings: RegistrySettings,
}

impl Registry {
    /// Directory with the given decay settings
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Insert a fresh record with a minted id, `online` and a current
    /// `last_seen`.
    pub async fn register(
        &self,
        address: String,
        capabilities: Vec<String>,
        metadata: Map<String, Value>,
    ) -> AgentSummary {
        let mut agents = self.agents.write().await;

        // ids are never reused for the lifetime of the registry
        let mut id = mint_id();
        while agents.contains_key(&id) {
            id = mint_id();
        }

        let now_ms = wire::unix_millis();
        let record = AgentRecord {
            id: id.clone(),
            address,
            capabilities,
            metadata,
            status: AgentStatus::Online,
            last_seen: Instant::now(),
            last_seen_ms: now_ms,
            created_at_ms: now_ms,
        };
        let summary = record.summary();
        agents.insert(id, record);
        summary
    }

    /// Refresh `last_seen` and force status back to `online`
    pub async fn heartbeat(&self, id: &str) -> Result<u64> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(id)
            .ok_or_else(|| FabricError::AgentNotFound(id.to_string()))?;

        record.touch();
        record.status = AgentStatus::Online;
        Ok(record.last_seen_ms)
    }

    /// Refresh `last_seen` without changing status; no-op for unknown
    /// ids
    pub async fn touch(&self, id: &str) {
        if let Some(record) = self.agents.write().await.get_mut(id) {
            record.touch();
        }
    }

    /// Directory query with AND-ed filters, ordered by `last_seen`
    /// ascending. Offline records are never returned.
    pub async fn discover(&self, query: &DiscoverQuery) -> DiscoverPage {
        let agents = self.agents.read().await;

        let mut matches: Vec<&AgentRecord> = agents
            .values()
            .filter(|r| r.status != AgentStatus::Offline)
            .filter(|r| query.id.as_deref() != Some(r.id.as_str()))
            .filter(|r| match &query.status {
                Some(status) => r.status == *status,
                None => true,
            })
            .filter(|r| match &query.capabilities {
                Some(wanted) if !wanted.is_empty() => r.has_any_capability(wanted),
                _ => true,
            })
            .collect();

        matches.sort_by(|a, b| a.last_seen.cmp(&b.last_seen).then(a.id.cmp(&b.id)));

        let (limit, offset) = page_bounds(query.limit, query.offset);
        let agents: Vec<AgentSummary> = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(AgentRecord::summary)
            .collect();

        DiscoverPage {
            count: agents.len(),
            limit,
            offset,
            agents,
        }
    }

    /// Online agents advertising `capability`, most recently seen first
    pub async fn find(
        &self,
        capability: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> FindPage {
        let agents = self.agents.read().await;

        let mut matches: Vec<&AgentRecord> = agents
            .values()
            .filter(|r| r.status == AgentStatus::Online)
            .filter(|r| r.capabilities.iter().any(|c| c == capability))
            .collect();

        matches.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));

        let (limit, offset) = page_bounds(limit, offset);
        let agents: Vec<AgentSummary> = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(AgentRecord::summary)
            .collect();

        FindPage {
            count: agents.len(),
            agents,
        }
    }

    /// Fetch one record whatever its status; the caller decides what an
    /// idle or offline peer is worth
    pub async fn lookup(&self, id: &str) -> Option<AgentSummary> {
        self.agents.read().await.get(id).map(AgentRecord::summary)
    }

    /// Explicit status update and/or metadata merge (merged, not
    /// replaced)
    pub async fn set_status(
        &self,
        id: &str,
        status: Option<AgentStatus>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(id)
            .ok_or_else(|| FabricError::AgentNotFound(id.to_string()))?;

        if let Some(status) = status {
            record.status = status;
        }
        if let Some(metadata) = metadata {
            for (key, value) in metadata {
                record.metadata.insert(key, value);
            }
        }
        record.touch();
        Ok(())
    }

    /// Force a record offline; no-op for unknown ids (disconnects can
    /// race the sweeper)
    pub async fn mark_offline(&self, id: &str) {
        if let Some(record) = self.agents.write().await.get_mut(id) {
            record.status = AgentStatus::Offline;
        }
    }

    /// One decay pass: stale `online` records fall to `idle`, stale
    /// `idle` records to `offline`. Returns (demoted-to-idle,
    /// demoted-to-offline).
    pub async fn sweep(&self) -> (usize, usize) {
        let mut agents = self.agents.write().await;
        let mut to_idle = 0;
        let mut to_offline = 0;

        for record in agents.values_mut() {
            let stale = record.last_seen.elapsed();
            match record.status {
                AgentStatus::Online if stale > self.settings.idle_after() => {
                    record.status = AgentStatus::Idle;
                    to_idle += 1;
                },
                AgentStatus::Idle if stale > self.settings.offline_after() => {
                    record.status = AgentStatus::Offline;
                    to_offline += 1;
                },
                _ => {},
            }
        }

        if to_idle > 0 || to_offline > 0 {
            tracing::debug!(to_idle, to_offline, "sweeper demoted records");
        }
        (to_idle, to_offline)
    }

    /// Sweeper cadence from the decay settings
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.settings.sweep_interval()
    }

    /// Status counts and capability histogram
    pub async fn counts(&self) -> RegistryCounts {
        let agents = self.agents.read().await;

        let mut counts = RegistryCounts {
            total: agents.len(),
            ..Default::default()
        };
        for record in agents.values() {
            match record.status {
                AgentStatus::Online => counts.online += 1,
                AgentStatus::Idle => counts.idle += 1,
                AgentStatus::Offline => counts.offline += 1,
            }
            for capability in &record.capabilities {
                *counts.capabilities.entry(capability.clone()).or_default() += 1;
            }
        }
        counts
    }
}

/// Aggregate view over the directory
#[derive(Debug, Clone, Default)]
pub struct RegistryCounts {
    pub total: usize,
    pub online: usize,
    pub idle: usize,
    pub offline: usize,
    pub capabilities: HashMap<String, usize>,
}

fn mint_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex_encode(&bytes)
}

fn page_bounds(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    (limit, offset.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn fast_decay() -> RegistrySettings {
        RegistrySettings {
            idle_after_ms: 40,
            offline_after_ms: 100,
            sweep_interval_ms: 10,
        }
    }

    fn registry() -> Registry {
        Registry::new(RegistrySettings::default())
    }

    async fn register_simple(registry: &Registry, port: u16, caps: &[&str]) -> AgentSummary {
        registry
            .register(
                format!("127.0.0.1:{port}"),
                caps.iter().map(|c| c.to_string()).collect(),
                Map::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_register_mints_hex_ids() {
        let registry = registry();

        let a = register_simple(&registry, 4000, &[]).await;
        let b = register_simple(&registry, 4001, &[]).await;

        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, AgentStatus::Online);
        assert_eq!(a.created_at, a.last_seen);
    }

    #[test]
    fn test_derive_address_takes_observed_ip() {
        let observed: SocketAddr = "203.0.113.9:51123".parse().unwrap();

        // Supplied port wins, supplied host is ignored
        assert_eq!(
            derive_address(observed, Some("10.0.0.1:4000"), false),
            "203.0.113.9:4000"
        );

        // No supplied address: full observed endpoint
        assert_eq!(derive_address(observed, None, false), "203.0.113.9:51123");

        // Unparseable port: full observed endpoint
        assert_eq!(
            derive_address(observed, Some("garbage"), false),
            "203.0.113.9:51123"
        );

        // Trust mode accepts the override verbatim
        assert_eq!(
            derive_address(observed, Some("10.0.0.1:4000"), true),
            "10.0.0.1:4000"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_revives_and_refreshes() {
        let registry = registry();
        let agent = register_simple(&registry, 4000, &[]).await;

        registry
            .set_status(&agent.id, Some(AgentStatus::Idle), None)
            .await
            .unwrap();

        let ts = registry.heartbeat(&agent.id).await.unwrap();
        let looked_up = registry.lookup(&agent.id).await.unwrap();
        assert_eq!(looked_up.status, AgentStatus::Online);
        assert!(ts >= agent.last_seen);

        assert!(matches!(
            registry.heartbeat("0000000000000000ffffffffffffffff").await,
            Err(FabricError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_filters() {
        let registry = registry();
        let chat = register_simple(&registry, 4000, &["chat"]).await;
        let search = register_simple(&registry, 4001, &["search"]).await;
        let both = register_simple(&registry, 4002, &["chat", "search"]).await;
        let gone = register_simple(&registry, 4003, &["chat"]).await;
        registry.mark_offline(&gone.id).await;

        // Offline records are never returned
        let page = registry.discover(&DiscoverQuery::default()).await;
        assert_eq!(page.count, 3);
        assert!(page.agents.iter().all(|a| a.id != gone.id));

        // Any-of capability filter
        let page = registry
            .discover(&DiscoverQuery {
                capabilities: Some(vec!["chat".to_string()]),
                ..Default::default()
            })
            .await;
        let ids: Vec<_> = page.agents.iter().map(|a| a.id.clone()).collect();
        assert!(ids.contains(&chat.id) && ids.contains(&both.id));
        assert!(!ids.contains(&search.id));

        // Self-exclusion
        let page = registry
            .discover(&DiscoverQuery {
                id: Some(chat.id.clone()),
                ..Default::default()
            })
            .await;
        assert!(page.agents.iter().all(|a| a.id != chat.id));
    }

    #[tokio::test]
    async fn test_discover_pagination_partitions() {
        let registry = registry();
        for port in 0..5u16 {
            register_simple(&registry, 4000 + port, &[]).await;
        }

        let mut seen = Vec::new();
        for k in 0..3 {
            let page = registry
                .discover(&DiscoverQuery {
                    limit: Some(2),
                    offset: Some(2 * k),
                    ..Default::default()
                })
                .await;
            assert_eq!(page.limit, 2);
            assert_eq!(page.offset, 2 * k);
            seen.extend(page.agents.into_iter().map(|a| a.id));
        }

        // No duplicates, no omissions
        let full = registry.discover(&DiscoverQuery::default()).await;
        let mut all: Vec<_> = full.agents.into_iter().map(|a| a.id).collect();
        all.sort();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, all);
    }

    #[tokio::test]
    async fn test_page_limit_capped() {
        let registry = registry();
        let page = registry
            .discover(&DiscoverQuery {
                limit: Some(10_000),
                ..Default::default()
            })
            .await;
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_find_is_online_only_and_recent_first() {
        let registry = registry();
        let old = register_simple(&registry, 4000, &["monitor"]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let recent = register_simple(&registry, 4001, &["monitor"]).await;
        let idle = register_simple(&registry, 4002, &["monitor"]).await;
        registry
            .set_status(&idle.id, Some(AgentStatus::Idle), None)
            .await
            .unwrap();

        let page = registry.find("monitor", None, None).await;
        let ids: Vec<_> = page.agents.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![recent.id, old.id]);

        assert!(registry.find("nope", None, None).await.agents.is_empty());
    }

    #[tokio::test]
    async fn test_set_status_merges_metadata() {
        let registry = registry();
        let agent = registry
            .register(
                "127.0.0.1:4000".to_string(),
                vec![],
                serde_json::from_value(json!({"region": "eu", "tier": 1})).unwrap(),
            )
            .await;

        registry
            .set_status(
                &agent.id,
                None,
                Some(serde_json::from_value(json!({"tier": 2, "zone": "a"})).unwrap()),
            )
            .await
            .unwrap();

        let looked_up = registry.lookup(&agent.id).await.unwrap();
        assert_eq!(looked_up.metadata["region"], json!("eu"));
        assert_eq!(looked_up.metadata["tier"], json!(2));
        assert_eq!(looked_up.metadata["zone"], json!("a"));
    }

    #[tokio::test]
    async fn test_lookup_returns_offline_records() {
        let registry = registry();
        let agent = register_simple(&registry, 4000, &[]).await;
        registry.mark_offline(&agent.id).await;

        let looked_up = registry.lookup(&agent.id).await.unwrap();
        assert_eq!(looked_up.status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn test_sweep_decays_online_to_idle_to_offline() {
        let registry = Registry::new(fast_decay());
        let agent = register_simple(&registry, 4000, &[]).await;

        // Fresh record: nothing decays
        registry.sweep().await;
        assert_eq!(
            registry.lookup(&agent.id).await.unwrap().status,
            AgentStatus::Online
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let (to_idle, _) = registry.sweep().await;
        assert_eq!(to_idle, 1);
        assert_eq!(
            registry.lookup(&agent.id).await.unwrap().status,
            AgentStatus::Idle
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let (_, to_offline) = registry.sweep().await;
        assert_eq!(to_offline, 1);
        assert_eq!(
            registry.lookup(&agent.id).await.unwrap().status,
            AgentStatus::Offline
        );

        // Offline records are invisible to discover
        assert_eq!(registry.discover(&DiscoverQuery::default()).await.count, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_interrupts_decay() {
        let registry = Registry::new(fast_decay());
        let agent = register_simple(&registry, 4000, &[]).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.sweep().await;
        assert_eq!(
            registry.lookup(&agent.id).await.unwrap().status,
            AgentStatus::Idle
        );

        registry.heartbeat(&agent.id).await.unwrap();
        registry.sweep().await;
        assert_eq!(
            registry.lookup(&agent.id).await.unwrap().status,
            AgentStatus::Online
        );
    }

    #[tokio::test]
    async fn test_counts() {
        let registry = registry();
        register_simple(&registry, 4000, &["chat"]).await;
        register_simple(&registry, 4001, &["chat", "search"]).await;
        let gone = register_simple(&registry, 4002, &[]).await;
        registry.mark_offline(&gone.id).await;

        let counts = registry.counts().await;
        assert_eq!(counts.total, 3);
        assert_eq!(counts.online, 2);
        assert_eq!(counts.offline, 1);
        assert_eq!(counts.capabilities["chat"], 2);
        assert_eq!(counts.capabilities["search"], 1);
    }
}
