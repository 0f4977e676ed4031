//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use launchpad_mcp::{
    core::{GatewayConfig, ServerRegistry, ServerSpec, ServerTransport, SessionManager},
    Connector, GatewayError, GatewayResult, McpConnection, RemoteCallResult, RemoteTool,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::WARN.into())
                    .from_env_lossy(),
            )
            .try_init();
    });
}

/// Behavior of one fake server.
#[derive(Clone, Default)]
pub struct FakeServer {
    pub tools: Vec<RemoteTool>,
    pub handshake_delay: Duration,
    /// Per-tool call latency.
    pub call_delays: HashMap<String, Duration>,
    /// Tools that answer with `isError: true` and this text.
    pub tool_errors: HashMap<String, String>,
    /// Tools whose call breaks the transport with this reason.
    pub call_transport_errors: HashMap<String, String>,
    /// Fail `tools/list` during the handshake with this reason.
    pub list_error: Option<String>,
}

impl FakeServer {
    pub fn with_tools(tools: Vec<RemoteTool>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }
}

/// Connector that fabricates in-process servers and counts handshakes.
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    connects: Mutex<HashMap<String, usize>>,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: &str, server: FakeServer) -> Self {
        self.servers.insert(name.to_string(), server);
        self
    }

    pub fn connects(&self, server: &str) -> usize {
        self.connects.lock().get(server).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.connects.lock().values().sum()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Connections closed so far, by any path.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, spec: &ServerSpec) -> GatewayResult<Box<dyn McpConnection>> {
        *self.connects.lock().entry(spec.name.clone()).or_default() += 1;
        let server = self.servers.get(&spec.name).cloned().ok_or_else(|| {
            GatewayError::Connection {
                server: spec.name.clone(),
                reason: "connection refused".to_string(),
                missing_env: None,
                command: None,
            }
        })?;
        if !server.handshake_delay.is_zero() {
            tokio::time::sleep(server.handshake_delay).await;
        }
        Ok(Box::new(FakeConnection {
            name: spec.name.clone(),
            server,
            calls: self.calls.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct FakeConnection {
    name: String,
    server: FakeServer,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> GatewayResult<Vec<RemoteTool>> {
        match &self.server.list_error {
            Some(reason) => Err(GatewayError::protocol(&self.name, reason)),
            None => Ok(self.server.tools.clone()),
        }
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> GatewayResult<RemoteCallResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.server.call_delays.get(tool) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(reason) = self.server.call_transport_errors.get(tool) {
            return Err(GatewayError::protocol(&self.name, reason));
        }
        if let Some(message) = self.server.tool_errors.get(tool) {
            return Ok(RemoteCallResult {
                content: vec![json!({"type": "text", "text": message})],
                structured_content: None,
                is_error: true,
            });
        }
        let echo = json!({"tool": tool, "arguments": arguments});
        Ok(RemoteCallResult {
            content: vec![json!({"type": "text", "text": echo.to_string()})],
            structured_content: None,
            is_error: false,
        })
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn tool(name: &str, description: &str, schema: Value) -> RemoteTool {
    RemoteTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    }
}

pub fn github_tools() -> Vec<RemoteTool> {
    vec![
        tool(
            "create_pull_request",
            "Create a new pull request in a repository",
            json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string"},
                    "repo": {"type": "string"},
                    "title": {"type": "string"},
                    "head": {"type": "string"},
                    "base": {"type": "string"},
                    "body": {"type": "string"},
                    "draft": {"type": "boolean"}
                },
                "required": ["owner", "repo", "title", "head", "base"]
            }),
        ),
        tool(
            "list_pull_requests",
            "List pull requests for a repository",
            json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string"},
                    "repo": {"type": "string"},
                    "state": {"type": "string", "enum": ["open", "closed", "all"]}
                },
                "required": ["owner", "repo"]
            }),
        ),
        tool(
            "merge_pull_request",
            "Merge an open pull request",
            json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string"},
                    "repo": {"type": "string"},
                    "pull_number": {"type": "integer"}
                },
                "required": ["owner", "repo", "pull_number"]
            }),
        ),
    ]
}

pub fn slack_tools() -> Vec<RemoteTool> {
    vec![tool(
        "send_message",
        "Send a message to a channel",
        json!({
            "type": "object",
            "properties": {
                "channel": {"type": "string"},
                "text": {"type": "string"}
            },
            "required": ["channel", "text"]
        }),
    )]
}

/// A process server spec; `version` only varies the fingerprint.
pub fn stdio_spec(name: &str, version: &str) -> ServerSpec {
    let transport = ServerTransport::Stdio {
        command: "npx".to_string(),
        args: vec!["-y".to_string(), format!("@modelcontextprotocol/server-{}@{}", name, version)],
        env: BTreeMap::new(),
    };
    ServerSpec::literal(name, transport).expect("valid spec")
}

pub fn registry(specs: Vec<ServerSpec>) -> Arc<ServerRegistry> {
    Arc::new(ServerRegistry::new(specs).expect("unique server names"))
}

pub fn manager(
    specs: Vec<ServerSpec>,
    connector: Arc<FakeConnector>,
    config: GatewayConfig,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(registry(specs), connector, config))
}

/// Connector serving the standard github and slack fixtures.
pub fn standard_connector() -> FakeConnector {
    FakeConnector::new()
        .server("github", FakeServer::with_tools(github_tools()))
        .server("slack", FakeServer::with_tools(slack_tools()))
}
