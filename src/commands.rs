//! Command handlers.
//!
//! Every handler returns a [`Report`] or a classified [`GatewayError`]; the
//! caller decides how to render either.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    io::{self, Read},
    path::PathBuf,
    sync::Arc,
};

use launchpad_mcp::{
    core::GatewayConfig, search, ArgumentSource, BuildReport, CallDispatcher, Connector,
    FileIndexStore, GatewayError, GatewayResult, IndexSnapshot, IndexStore, SearchMethod,
    ServerRegistry, SessionManager, ToolIndex, ToolRecord,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    cli::{Command, SessionCommand},
    output::Report,
    status::resident_status,
};

/// Everything one invocation needs, built once from the loaded configuration.
pub struct Context {
    manager: Arc<SessionManager>,
    index: ToolIndex,
    dispatcher: CallDispatcher,
    cache_dir: PathBuf,
}

impl Context {
    pub fn new(
        registry: ServerRegistry,
        connector: Arc<dyn Connector>,
        config: GatewayConfig,
        cache_dir: PathBuf,
    ) -> Self {
        let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(&cache_dir));
        Self::with_store(registry, connector, config, store, cache_dir)
    }

    pub fn with_store(
        registry: ServerRegistry,
        connector: Arc<dyn Connector>,
        config: GatewayConfig,
        store: Arc<dyn IndexStore>,
        cache_dir: PathBuf,
    ) -> Self {
        let manager = Arc::new(SessionManager::new(Arc::new(registry), connector, config));
        Self {
            index: ToolIndex::new(manager.clone(), store),
            dispatcher: CallDispatcher::new(manager.clone()),
            manager,
            cache_dir,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    fn registry(&self) -> &ServerRegistry {
        self.manager.registry()
    }

    /// Run one command. Sessions stay open until [`Context::shutdown`].
    pub async fn execute(&self, command: Command) -> GatewayResult<Report> {
        match command {
            Command::Search {
                query,
                method,
                limit,
                first,
            } => self.search(&query, method.into(), limit, first).await,
            Command::Inspect {
                server,
                tool,
                example,
            } => self.inspect(&server, &tool, example).await,
            Command::Call {
                server,
                tool,
                arguments,
                stdin,
            } => {
                let source = match arguments {
                    Some(text) if text != "-" => ArgumentSource::Inline(text),
                    None if !stdin => ArgumentSource::Inline(String::new()),
                    _ => ArgumentSource::Reader(Box::new(io::stdin()) as Box<dyn Read + Send>),
                };
                self.call(&server, &tool, source).await
            }
            Command::List { server, refresh } => match server {
                Some(server) => self.list_tools(&server, refresh).await,
                None => self.list_servers(refresh).await,
            },
            Command::Session {
                command: SessionCommand::Status,
            } => Ok(self.session_status()),
        }
    }

    pub async fn shutdown(&self) {
        self.manager.close_all().await;
    }

    /// Current index, rebuilding stale or mismatched parts first.
    async fn fresh_index(&self, force: bool) -> GatewayResult<BuildReport> {
        let report = self.index.refresh(force).await?;
        for (server, err) in &report.failures {
            warn!("Server '{}' could not be indexed: {}", server, err);
        }
        Ok(report)
    }

    pub async fn search(
        &self,
        query: &str,
        method: SearchMethod,
        limit: usize,
        first: bool,
    ) -> GatewayResult<Report> {
        let report = self.fresh_index(false).await?;
        let results = search(&report.snapshot, query, method, limit)?;

        let mut items: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "server": r.record.server,
                    "tool": r.record.name,
                    "score": r.score,
                    "description": r.record.description,
                    "requiredParams": r.record.required_params(),
                })
            })
            .collect();
        if first {
            if let (Some(top), Some(Value::Object(item))) = (results.first(), items.first_mut()) {
                item.insert("inputSchema".to_string(), top.record.input_schema.clone());
                item.insert("example".to_string(), Value::String(top.record.example_call()));
            }
        }

        let mut data = json!({
            "query": query,
            "method": method.as_str(),
            "results": items,
        });
        attach_failures(&mut data, &report);

        let mut human = String::new();
        if results.is_empty() {
            let _ = writeln!(human, "No tools found matching '{}'", query);
        }
        for (i, result) in results.iter().enumerate() {
            let record = result.record;
            let _ = writeln!(human, "{} (score {:.2})", record.key(), result.score);
            if !record.description.is_empty() {
                let _ = writeln!(human, "  {}", first_line(&record.description));
            }
            let _ = writeln!(human, "  {}", record.params_summary());
            if first && i == 0 {
                let _ = writeln!(human, "\n{}", schema_text(record));
                let _ = writeln!(human, "Example:\n  {}\n", record.example_call());
            }
        }
        append_failures(&mut human, &report);
        Ok(Report::data(data, human))
    }

    pub async fn inspect(&self, server: &str, tool: &str, example: bool) -> GatewayResult<Report> {
        if !self.registry().contains(server) {
            return Err(self.registry().not_found(server));
        }
        let report = self.fresh_index(false).await?;
        let record = lookup(&report, server, tool)?;

        let mut data = json!({
            "server": record.server,
            "tool": record.name,
            "description": record.description,
            "inputSchema": record.input_schema,
            "requiredParams": record.required_params(),
        });
        let mut human = format!("{}\n", record.key());
        if !record.description.is_empty() {
            let _ = writeln!(human, "\n{}", record.description);
        }
        let _ = writeln!(human, "\n{}\n\n{}", record.params_summary(), schema_text(record));

        if example {
            let arguments = Value::Object(record.example_arguments());
            let command = record.example_call();
            let _ = writeln!(human, "Example:\n  {}", command);
            if let Value::Object(map) = &mut data {
                map.insert(
                    "example".to_string(),
                    json!({ "arguments": arguments, "command": command }),
                );
            }
        }
        Ok(Report::data(data, human))
    }

    /// Validate and forward a call.
    ///
    /// Uses the cached index as-is. A server that is missing from it, whose
    /// config changed, or whose last indexing failed is indexed first through
    /// the session the call will use.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        source: ArgumentSource,
    ) -> GatewayResult<Report> {
        if !self.registry().contains(server) {
            return Err(self.registry().not_found(server));
        }
        let arguments = source.into_arguments()?;

        let mut snapshot = self.index.load();
        let needs_index = snapshot
            .as_ref()
            .map_or(true, |s| self.index.pending_servers(s).iter().any(|n| n == server));
        if needs_index {
            debug!("Indexing '{}' before calling '{}'", server, tool);
            let report = self.index.refresh_servers(&[server.to_string()]).await?;
            if let Some(err) = report.failures.get(server) {
                if !report.snapshot.is_indexed(server) {
                    return Err(err.clone());
                }
            }
            snapshot = Some(report.snapshot);
        }

        let result = self
            .dispatcher
            .call(snapshot.as_ref(), server, tool, ArgumentSource::Value(arguments))
            .await
            .into_result()?;

        let human = match &result {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(Report::call_result(result, human))
    }

    pub async fn list_servers(&self, refresh: bool) -> GatewayResult<Report> {
        let report = self.fresh_index(refresh).await?;
        let snapshot = &report.snapshot;

        let mut servers = Vec::new();
        let mut human = String::new();
        let width = self.registry().names().iter().map(String::len).max().unwrap_or(0);

        for spec in self.registry().iter() {
            let entry = snapshot.server(&spec.name);
            let (status, detail) = match entry {
                Some(e) if e.error.is_none() => ("ok", format!("{} tools", e.tool_count)),
                Some(e) if e.stale => (
                    "stale",
                    format!(
                        "{} cached tools; last refresh failed: {}",
                        e.tool_count,
                        e.error.as_deref().unwrap_or_default()
                    ),
                ),
                Some(e) => ("error", e.error.clone().unwrap_or_default()),
                None => ("unknown", "not indexed".to_string()),
            };

            let mut item = json!({
                "name": spec.name,
                "transport": spec.transport.kind(),
                "status": status,
                "session": self
                    .manager
                    .state(&spec.name)
                    .map(|s| s.as_str())
                    .unwrap_or("unconnected"),
            });
            if let Value::Object(map) = &mut item {
                match entry {
                    Some(e) if e.is_usable() => {
                        map.insert("tools".to_string(), json!(e.tool_count));
                    }
                    _ => {}
                }
                if let Some(err) = entry.and_then(|e| e.error.as_ref()) {
                    map.insert("error".to_string(), json!(err));
                }
            }
            servers.push(item);

            let _ = writeln!(
                human,
                "{:<width$}  {:<7}  {}",
                spec.name,
                status,
                detail,
                width = width
            );
        }
        if self.registry().is_empty() {
            human.push_str("No servers configured.\n");
        }

        let data = json!({
            "servers": servers,
            "indexedAt": snapshot.built_at().to_rfc3339(),
        });
        Ok(Report::data(data, human))
    }

    pub async fn list_tools(&self, server: &str, refresh: bool) -> GatewayResult<Report> {
        if !self.registry().contains(server) {
            return Err(self.registry().not_found(server));
        }
        let report = if refresh {
            self.index.refresh_servers(&[server.to_string()]).await?
        } else {
            self.fresh_index(false).await?
        };
        if !report.snapshot.is_indexed(server) {
            if let Some(err) = report.failures.get(server) {
                return Err(err.clone());
            }
        }

        let records: Vec<&ToolRecord> = report.snapshot.tools_for(server).collect();
        let tools: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "description": r.description,
                    "requiredParams": r.required_params(),
                })
            })
            .collect();

        let mut human = format!("{} ({} tools)\n", server, records.len());
        for record in &records {
            let _ = writeln!(human, "  {}", record.name);
            if !record.description.is_empty() {
                let _ = writeln!(human, "    {}", first_line(&record.description));
            }
        }
        Ok(Report::data(json!({ "server": server, "tools": tools }), human))
    }

    pub fn session_status(&self) -> Report {
        let resident = resident_status(&self.cache_dir);
        let sessions: Vec<Value> = self
            .manager
            .states()
            .into_iter()
            .map(|(server, state)| json!({ "server": server, "state": state.as_str() }))
            .collect();

        let mut human = format!("Resident process: {}\n", resident.describe());
        for (server, state) in self.manager.states() {
            let _ = writeln!(human, "  {}: {}", server, state.as_str());
        }
        Report::data(
            json!({
                "resident": resident,
                "running": resident.is_running(),
                "sessions": sessions,
            }),
            human,
        )
    }
}

/// Resolve a record, surfacing the server's indexing failure if it has no usable entries.
fn lookup<'a>(report: &'a BuildReport, server: &str, tool: &str) -> GatewayResult<&'a ToolRecord> {
    let snapshot: &IndexSnapshot = &report.snapshot;
    if let Some(record) = snapshot.get(server, tool) {
        return Ok(record);
    }
    if !snapshot.is_indexed(server) {
        if let Some(err) = report.failures.get(server) {
            return Err(err.clone());
        }
    }
    Err(GatewayError::tool_not_found(
        server,
        tool,
        snapshot.tools_for(server).map(|r| r.name.as_str()),
    ))
}

fn schema_text(record: &ToolRecord) -> String {
    format!(
        "Schema:\n{}",
        serde_json::to_string_pretty(&record.input_schema)
            .unwrap_or_else(|_| record.input_schema.to_string())
    )
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn attach_failures(data: &mut Value, report: &BuildReport) {
    if report.failures.is_empty() {
        return;
    }
    let errors: BTreeMap<&str, Value> = report
        .failures
        .iter()
        .map(|(server, err)| (server.as_str(), err.to_json()))
        .collect();
    if let Value::Object(map) = data {
        map.insert("errors".to_string(), json!(errors));
    }
}

fn append_failures(human: &mut String, report: &BuildReport) {
    for (server, err) in &report.failures {
        let _ = writeln!(human, "\nWarning: server '{}' unavailable: {}", server, err);
    }
}
