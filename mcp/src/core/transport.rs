//! Transport abstraction.
//!
//! The session manager only sees [`Connector`] and [`McpConnection`]. The
//! production implementation, [`RmcpConnector`], speaks MCP through `rmcp`
//! over a child process, streamable HTTP or SSE.

use std::{borrow::Cow, collections::BTreeMap, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use rmcp::{
    model::CallToolRequestParam,
    service::{RunningService, ServiceError},
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::config::{ServerSpec, ServerTransport};
use crate::error::{GatewayError, GatewayResult};

type McpClient = RunningService<RoleClient, ()>;

/// A tool as advertised by a server during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Raw outcome of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteCallResult {
    /// Content blocks as JSON (`{"type": "text", "text": ...}` and friends).
    pub content: Vec<Value>,
    pub structured_content: Option<Value>,
    /// Set when the tool itself reported failure.
    pub is_error: bool,
}

impl RemoteCallResult {
    /// Text blocks joined by newlines, if every block is text.
    pub fn text(&self) -> Option<String> {
        let texts: Option<Vec<&str>> = self
            .content
            .iter()
            .map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect();
        texts.filter(|t| !t.is_empty()).map(|t| t.join("\n"))
    }
}

/// An established, handshaken connection to one server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> GatewayResult<Vec<RemoteTool>>;

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> GatewayResult<RemoteCallResult>;

    /// Release the underlying process or connection. Idempotent.
    async fn close(&self);
}

/// Opens connections for a transport kind.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete protocol capability negotiation.
    async fn connect(&self, spec: &ServerSpec) -> GatewayResult<Box<dyn McpConnection>>;
}

/// `rmcp`-backed connector for stdio, streamable HTTP and SSE servers.
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector {
    /// Let child processes write to our stderr instead of discarding it.
    pub inherit_stderr: bool,
}

impl RmcpConnector {
    pub fn new(inherit_stderr: bool) -> Self {
        Self { inherit_stderr }
    }

    async fn connect_stdio(
        &self,
        spec: &ServerSpec,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> GatewayResult<McpClient> {
        let inherit_stderr = self.inherit_stderr;
        let transport = TokioChildProcess::new(tokio::process::Command::new(command).configure(
            |cmd| {
                cmd.args(args).envs(env.iter()).stderr(if inherit_stderr {
                    Stdio::inherit()
                } else {
                    Stdio::null()
                });
            },
        ))
        .map_err(|e| GatewayError::from_spawn(&spec.name, command, &e))?;

        let client = ()
            .serve(transport)
            .await
            .map_err(|e| {
                GatewayError::protocol(&spec.name, format!("initialize stdio client: {}", e))
            })?;

        info!("Connected to stdio server '{}'", spec.name);
        Ok(client)
    }

    async fn connect_http(
        &self,
        spec: &ServerSpec,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> GatewayResult<McpClient> {
        let http = build_http_client(&spec.name, headers)?;
        let transport = StreamableHttpClientTransport::with_client(
            http,
            StreamableHttpClientTransportConfig::with_uri(url),
        );

        let client = ().serve(transport).await.map_err(|e| GatewayError::Connection {
            server: spec.name.clone(),
            reason: format!("initialize streamable HTTP client: {}", e),
            missing_env: None,
            command: None,
        })?;

        info!("Connected to streamable HTTP server '{}' at {}", spec.name, url);
        Ok(client)
    }

    async fn connect_sse(
        &self,
        spec: &ServerSpec,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> GatewayResult<McpClient> {
        let http = build_http_client(&spec.name, headers)?;
        let cfg = SseClientConfig {
            sse_endpoint: url.to_string().into(),
            ..Default::default()
        };

        let transport = SseClientTransport::start_with_client(http, cfg)
            .await
            .map_err(|e| GatewayError::Connection {
                server: spec.name.clone(),
                reason: format!("open SSE stream: {}", e),
                missing_env: None,
                command: None,
            })?;

        let client = ()
            .serve(transport)
            .await
            .map_err(|e| {
                GatewayError::protocol(&spec.name, format!("initialize SSE client: {}", e))
            })?;

        info!("Connected to SSE server '{}' at {}", spec.name, url);
        Ok(client)
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(&self, spec: &ServerSpec) -> GatewayResult<Box<dyn McpConnection>> {
        debug!("Connecting to MCP server '{}' via {:?}", spec.name, spec.transport);

        let client = match &spec.transport {
            ServerTransport::Stdio { command, args, env } => {
                self.connect_stdio(spec, command, args, env).await?
            }
            ServerTransport::Http { url, headers } => self.connect_http(spec, url, headers).await?,
            ServerTransport::Sse { url, headers } => self.connect_sse(spec, url, headers).await?,
        };

        Ok(Box::new(RmcpConnection {
            server: spec.name.clone(),
            client: Mutex::new(Some(Arc::new(client))),
        }))
    }
}

fn build_http_client(
    server: &str,
    headers: &BTreeMap<String, String>,
) -> GatewayResult<reqwest::Client> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            GatewayError::config(format!(
                "server '{}' has invalid header name '{}': {}",
                server, name, e
            ))
        })?;
        let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
            GatewayError::config(format!(
                "server '{}' has invalid value for header '{}': {}",
                server, name, e
            ))
        })?;
        header_map.insert(header_name, header_value);
    }

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .default_headers(header_map)
        .build()
        .map_err(|e| GatewayError::Connection {
            server: server.to_string(),
            reason: format!("build HTTP client: {}", e),
            missing_env: None,
            command: None,
        })
}

struct RmcpConnection {
    server: String,
    client: Mutex<Option<Arc<McpClient>>>,
}

impl RmcpConnection {
    fn client(&self) -> GatewayResult<Arc<McpClient>> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::protocol(&self.server, "connection already closed"))
    }
}

#[async_trait]
impl McpConnection for RmcpConnection {
    async fn list_tools(&self) -> GatewayResult<Vec<RemoteTool>> {
        let client = self.client()?;
        let tools = client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| GatewayError::protocol(&self.server, format!("list tools: {}", e)))?;

        Ok(tools
            .into_iter()
            .map(|t| RemoteTool {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> GatewayResult<RemoteCallResult> {
        let client = self.client()?;
        let request = CallToolRequestParam {
            name: Cow::Owned(tool.to_string()),
            arguments: Some(arguments),
        };

        match client.call_tool(request).await {
            Ok(result) => Ok(RemoteCallResult {
                content: result
                    .content
                    .iter()
                    .filter_map(|c| serde_json::to_value(c).ok())
                    .collect(),
                structured_content: result.structured_content,
                is_error: result.is_error.unwrap_or(false),
            }),
            // A JSON-RPC error response means the server is healthy and rejected the call.
            Err(ServiceError::McpError(data)) => Err(GatewayError::ToolExecution {
                server: self.server.clone(),
                tool: tool.to_string(),
                message: data.message.to_string(),
            }),
            Err(e) => Err(GatewayError::protocol(&self.server, format!("call '{}': {}", tool, e))),
        }
    }

    async fn close(&self) {
        let Some(client) = self.client.lock().take() else {
            return;
        };
        match Arc::try_unwrap(client) {
            Ok(client) => {
                if let Err(e) = client.cancel().await {
                    warn!("Error closing connection to '{}': {}", self.server, e);
                } else {
                    debug!("Closed connection to '{}'", self.server);
                }
            }
            // An abandoned call still holds a reference; dropping the last one cancels the service.
            Err(_) => debug!(
                "Connection to '{}' released with a call still in flight",
                self.server
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_text_joins_text_blocks() {
        let result = RemoteCallResult {
            content: vec![
                json!({"type": "text", "text": "line one"}),
                json!({"type": "text", "text": "line two"}),
            ],
            ..Default::default()
        };
        assert_eq!(result.text().as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_text_none_for_mixed_content() {
        let result = RemoteCallResult {
            content: vec![
                json!({"type": "text", "text": "caption"}),
                json!({"type": "image", "data": "AAAA", "mimeType": "image/png"}),
            ],
            ..Default::default()
        };
        assert!(result.text().is_none());
        assert!(RemoteCallResult::default().text().is_none());
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = build_http_client("remote", &headers).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn test_missing_command_is_connection_error() {
        let spec = ServerSpec::literal(
            "ghost",
            ServerTransport::Stdio {
                command: "definitely-not-a-real-mcp-binary-7f3a".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            },
        )
        .unwrap();

        let err = match RmcpConnector::default().connect(&spec).await {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), crate::error::ErrorKind::ConnectionError);
        assert!(err.to_string().contains("Command not found"));
    }
}
