//! Immutable index snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ToolKey, ToolRecord};

/// Per-server bookkeeping recorded when a snapshot is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIndexEntry {
    /// Fingerprint of the server's config when its entries were last attempted.
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub tool_count: usize,
    /// Entries are last-known-good data from an earlier build.
    #[serde(default)]
    pub stale: bool,
    /// Why the last attempt for this server failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerIndexEntry {
    /// Whether records for this server can be trusted for lookup and validation.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() || self.stale
    }
}

/// A fully built, immutable tool index.
///
/// Records are kept sorted by `(server, name)` and keys are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    built_at: DateTime<Utc>,
    records: Vec<ToolRecord>,
    servers: BTreeMap<String, ServerIndexEntry>,
}

impl IndexSnapshot {
    /// Assemble a snapshot. Duplicate keys keep the last record supplied.
    pub fn new(
        built_at: DateTime<Utc>,
        records: impl IntoIterator<Item = ToolRecord>,
        servers: BTreeMap<String, ServerIndexEntry>,
    ) -> Self {
        let unique: BTreeMap<ToolKey, ToolRecord> =
            records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            built_at,
            records: unique.into_values().collect(),
            servers,
        }
    }

    pub fn empty(built_at: DateTime<Utc>) -> Self {
        Self::new(built_at, Vec::new(), BTreeMap::new())
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn records(&self) -> &[ToolRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn servers(&self) -> &BTreeMap<String, ServerIndexEntry> {
        &self.servers
    }

    pub fn server(&self, name: &str) -> Option<&ServerIndexEntry> {
        self.servers.get(name)
    }

    /// True when `server` has entries that lookups may rely on.
    pub fn is_indexed(&self, server: &str) -> bool {
        self.server(server).is_some_and(ServerIndexEntry::is_usable)
    }

    pub fn tools_for<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a ToolRecord> + 'a {
        // Records are sorted by server, so this is a contiguous run.
        let start = self.records.partition_point(|r| r.server.as_str() < server);
        self.records[start..]
            .iter()
            .take_while(move |r| r.server == server)
    }

    pub fn get(&self, server: &str, tool: &str) -> Option<&ToolRecord> {
        self.records
            .binary_search_by(|r| (r.server.as_str(), r.name.as_str()).cmp(&(server, tool)))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn server_names(&self) -> BTreeSet<&str> {
        self.servers.keys().map(String::as_str).collect()
    }
}
