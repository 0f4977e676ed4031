//! Server registry and gateway configuration.
//!
//! The registry is built once per run from already-resolved configuration and
//! passed explicitly to the session manager and tool index. Nothing here reads
//! files or the process environment.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, GatewayResult};

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_INDEX_TTL_SECS: u64 = 24 * 60 * 60;

/// How a server is reached.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerTransport {
    /// Spawn a child process and speak over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint.
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Legacy server-sent-events endpoint.
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl ServerTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::Http { .. } => "http",
            ServerTransport::Sse { .. } => "sse",
        }
    }

    /// Command line (stdio) or URL (network), for diagnostics.
    pub fn display_target(&self) -> String {
        match self {
            ServerTransport::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            ServerTransport::Stdio { command, args, .. } => {
                format!("{} {}", command, args.join(" "))
            }
            ServerTransport::Http { url, .. } | ServerTransport::Sse { url, .. } => url.clone(),
        }
    }
}

impl fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTransport::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .finish(),
            ServerTransport::Http { url, headers } => f
                .debug_struct("Http")
                .field("url", url)
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
            ServerTransport::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
        }
    }
}

/// One configured server. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    /// Transport with every `${VAR}` reference already substituted.
    pub transport: ServerTransport,
    /// Variables referenced by the declaration that were unset or empty.
    pub missing_env: Vec<String>,
    /// Hash of the declaration as written, before substitution.
    pub fingerprint: String,
}

impl ServerSpec {
    /// Build a spec, fingerprinting the declared form of the transport.
    ///
    /// `declared` is the transport as written in the config file; `resolved`
    /// is the same transport after environment substitution.
    pub fn new(
        name: impl Into<String>,
        declared: &ServerTransport,
        resolved: ServerTransport,
        missing_env: Vec<String>,
    ) -> GatewayResult<Self> {
        let name = name.into();
        validate_transport(&name, &resolved)?;
        Ok(Self {
            fingerprint: fingerprint(&name, declared),
            name,
            transport: resolved,
            missing_env,
        })
    }

    /// Spec whose declared and resolved forms are the same.
    pub fn literal(name: impl Into<String>, transport: ServerTransport) -> GatewayResult<Self> {
        let declared = transport.clone();
        Self::new(name, &declared, transport, Vec::new())
    }
}

fn validate_transport(name: &str, transport: &ServerTransport) -> GatewayResult<()> {
    match transport {
        ServerTransport::Stdio { command, .. } if command.trim().is_empty() => {
            Err(GatewayError::config_with_hint(
                format!("server '{}' has an empty command", name),
                format!(
                    "Set \"command\" (or \"url\" for a network server) under mcpServers.{}.",
                    name
                ),
            ))
        }
        ServerTransport::Http { url, .. } | ServerTransport::Sse { url, .. } => {
            match url::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
                Ok(parsed) => Err(GatewayError::config(format!(
                    "server '{}' uses unsupported URL scheme '{}'",
                    name,
                    parsed.scheme()
                ))),
                Err(e) => Err(GatewayError::config(format!(
                    "server '{}' has an invalid URL '{}': {}",
                    name, url, e
                ))),
            }
        }
        _ => Ok(()),
    }
}

/// SHA-256 over the server name and its declared transport.
///
/// `BTreeMap` fields keep the serialization canonical, so equal declarations
/// always hash equally.
pub fn fingerprint(name: &str, declared: &ServerTransport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    // Serializing a plain enum of strings cannot fail.
    if let Ok(bytes) = serde_json::to_vec(declared) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Ordered, read-only mapping from server name to spec.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<ServerSpec>,
}

impl ServerRegistry {
    pub fn new(servers: Vec<ServerSpec>) -> GatewayResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for spec in &servers {
            if !seen.insert(spec.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "server '{}' is declared more than once",
                    spec.name
                )));
            }
        }
        Ok(Self { servers })
    }

    pub fn get(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerSpec> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// `ServerNotFound` for `name`, with suggestions drawn from this registry.
    pub fn not_found(&self, name: &str) -> GatewayError {
        GatewayError::server_not_found(name, &self.names())
    }
}

/// Timeouts and cache lifetimes shared by the core components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub idle_timeout: Duration,
    pub index_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            index_ttl: Duration::from_secs(DEFAULT_INDEX_TTL_SECS),
        }
    }
}
