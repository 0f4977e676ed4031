//! Tool index: building, staleness and refresh.
//!
//! A build acquires a session per requested server (concurrently), turns the
//! tools advertised in its handshake into [`ToolRecord`]s and merges them
//! with the untouched entries of the previous snapshot. One unreachable
//! server does not fail the build: its last-known-good records are kept and
//! tagged stale, and the failure is reported next to the result. A build
//! that leaves no server usable at all fails with the first error instead.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{
    snapshot::{IndexSnapshot, ServerIndexEntry},
    store::IndexStore,
    types::ToolRecord,
};
use crate::{
    core::{config::ServerRegistry, manager::SessionManager},
    error::{GatewayError, GatewayResult},
};

/// Outcome of a build or refresh.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub snapshot: IndexSnapshot,
    /// Servers whose entries were rebuilt successfully.
    pub rebuilt: Vec<String>,
    /// Servers that could not be reached, with the classified error.
    pub failures: BTreeMap<String, GatewayError>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ToolIndex {
    manager: Arc<SessionManager>,
    store: Arc<dyn IndexStore>,
    ttl: Duration,
}

impl ToolIndex {
    pub fn new(manager: Arc<SessionManager>, store: Arc<dyn IndexStore>) -> Self {
        let ttl = manager.config().index_ttl;
        Self {
            manager,
            store,
            ttl,
        }
    }

    fn registry(&self) -> &ServerRegistry {
        self.manager.registry()
    }

    /// Last persisted snapshot. Never touches the network.
    pub fn load(&self) -> Option<IndexSnapshot> {
        self.store.load()
    }

    /// Stale if older than the TTL, if any server is pending a rebuild, or if
    /// the configured server set differs from the indexed one.
    pub fn is_stale(&self, snapshot: &IndexSnapshot) -> bool {
        self.is_stale_at(snapshot, Utc::now())
    }

    pub fn is_stale_at(&self, snapshot: &IndexSnapshot, now: DateTime<Utc>) -> bool {
        self.is_expired_at(snapshot, now)
            || !self.pending_servers(snapshot).is_empty()
            || self.has_removed_servers(snapshot)
    }

    fn is_expired_at(&self, snapshot: &IndexSnapshot, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(snapshot.built_at()) > ttl,
            Err(_) => false,
        }
    }

    /// Configured servers that are missing from `snapshot` or whose fingerprint changed.
    pub fn mismatched_servers(&self, snapshot: &IndexSnapshot) -> Vec<String> {
        self.registry()
            .iter()
            .filter(|spec| {
                snapshot
                    .server(&spec.name)
                    .map_or(true, |entry| entry.fingerprint != spec.fingerprint)
            })
            .map(|spec| spec.name.clone())
            .collect()
    }

    /// Servers a read rebuilds: mismatched or new ones, plus those whose last
    /// indexing attempt failed.
    pub fn pending_servers(&self, snapshot: &IndexSnapshot) -> Vec<String> {
        self.registry()
            .iter()
            .filter(|spec| match snapshot.server(&spec.name) {
                Some(entry) => entry.fingerprint != spec.fingerprint || entry.error.is_some(),
                None => true,
            })
            .map(|spec| spec.name.clone())
            .collect()
    }

    fn has_removed_servers(&self, snapshot: &IndexSnapshot) -> bool {
        snapshot
            .servers()
            .keys()
            .any(|name| !self.registry().contains(name))
    }

    /// Build a snapshot, rebuilding `servers` and carrying over every other
    /// configured server's entries from `previous` unchanged.
    pub async fn build(
        &self,
        servers: &[String],
        previous: Option<&IndexSnapshot>,
    ) -> GatewayResult<BuildReport> {
        for name in servers {
            if !self.registry().contains(name) {
                return Err(self.registry().not_found(name));
            }
        }

        let now = Utc::now();
        let results = join_all(servers.iter().map(|name| self.index_server(name, now))).await;

        let mut records: Vec<ToolRecord> = Vec::new();
        let mut entries: BTreeMap<String, ServerIndexEntry> = BTreeMap::new();
        let mut rebuilt = Vec::new();
        let mut failures = BTreeMap::new();

        for (name, result) in servers.iter().zip(results) {
            let fingerprint = self
                .registry()
                .get(name)
                .map(|spec| spec.fingerprint.clone())
                .unwrap_or_default();

            match result {
                Ok(server_records) => {
                    entries.insert(
                        name.clone(),
                        ServerIndexEntry {
                            fingerprint,
                            built_at: now,
                            tool_count: server_records.len(),
                            stale: false,
                            error: None,
                        },
                    );
                    records.extend(server_records);
                    rebuilt.push(name.clone());
                }
                Err(err) => {
                    warn!("Failed to index server '{}': {}", name, err);
                    let kept: Vec<ToolRecord> = previous
                        .map(|p| p.tools_for(name).cloned().collect())
                        .unwrap_or_default();
                    let prior = previous.and_then(|p| p.server(name));
                    entries.insert(
                        name.clone(),
                        ServerIndexEntry {
                            fingerprint,
                            built_at: prior.map(|e| e.built_at).unwrap_or(now),
                            tool_count: kept.len(),
                            stale: prior.is_some_and(ServerIndexEntry::is_usable),
                            error: Some(err.to_string()),
                        },
                    );
                    records.extend(kept);
                    failures.insert(name.clone(), err);
                }
            }
        }

        // Unrequested servers keep their previous entries untouched.
        if let Some(previous) = previous {
            for spec in self.registry().iter() {
                if entries.contains_key(&spec.name) {
                    continue;
                }
                if let Some(entry) = previous.server(&spec.name) {
                    entries.insert(spec.name.clone(), entry.clone());
                    records.extend(previous.tools_for(&spec.name).cloned());
                }
            }
        }

        if !entries.values().any(ServerIndexEntry::is_usable) {
            if let Some((name, err)) = failures.iter().next() {
                warn!("No server could be indexed; first failure was '{}'", name);
                return Err(err.clone());
            }
        }

        let covers_registry = self.registry().iter().all(|spec| servers.contains(&spec.name));
        let built_at = match previous {
            Some(previous) if !covers_registry => previous.built_at(),
            _ => now,
        };

        Ok(BuildReport {
            snapshot: IndexSnapshot::new(built_at, records, entries),
            rebuilt,
            failures,
        })
    }

    async fn index_server(
        &self,
        name: &str,
        built_at: DateTime<Utc>,
    ) -> GatewayResult<Vec<ToolRecord>> {
        let session = self.manager.acquire(name).await?;
        let records = session
            .tools()
            .iter()
            .map(|tool| ToolRecord::from_remote(name, tool, built_at))
            .collect::<Vec<_>>();
        self.manager.release(&session);
        debug!("Indexed {} tools from '{}'", records.len(), name);
        Ok(records)
    }

    /// Bring the persisted index up to date and return it.
    ///
    /// A missing or expired snapshot rebuilds every configured server. Otherwise
    /// pending servers (changed, new or previously failed) are rebuilt; `force`
    /// rebuilds everything only when there are none. Removed servers are dropped.
    /// Nothing is persisted when no server could be indexed.
    pub async fn refresh(&self, force: bool) -> GatewayResult<BuildReport> {
        let previous = self.load();
        let targets = match &previous {
            Some(snapshot) if !self.is_expired_at(snapshot, Utc::now()) => {
                let pending = self.pending_servers(snapshot);
                if pending.is_empty() && force {
                    self.registry().names()
                } else {
                    pending
                }
            }
            _ => self.registry().names(),
        };

        if let Some(snapshot) = &previous {
            if targets.is_empty() && !self.has_removed_servers(snapshot) {
                debug!("Tool index is fresh ({} tools)", snapshot.len());
                return Ok(BuildReport {
                    snapshot: snapshot.clone(),
                    rebuilt: Vec::new(),
                    failures: BTreeMap::new(),
                });
            }
        }

        info!("Rebuilding tool index for {} servers", targets.len());
        let report = self.build(&targets, previous.as_ref()).await?;
        self.persist(&report.snapshot);
        Ok(report)
    }

    /// Rebuild just `servers`, keeping everything else.
    pub async fn refresh_servers(&self, servers: &[String]) -> GatewayResult<BuildReport> {
        let previous = self.load();
        let report = self.build(servers, previous.as_ref()).await?;
        self.persist(&report.snapshot);
        Ok(report)
    }

    fn persist(&self, snapshot: &IndexSnapshot) {
        if let Err(e) = self.store.save(snapshot) {
            warn!("Failed to write tool index cache: {}", e);
        }
    }
}
