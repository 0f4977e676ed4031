//! Gateway error types and classification.
//!
//! Every failure that can reach a caller is one of the [`ErrorKind`]s below.
//! Each variant carries the context its remediation hint needs (closest known
//! names, the expected schema, a missing environment variable), so no other
//! module has to build error text of its own.

use std::{fmt, io};

use serde_json::{json, Value};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Suggestions below this similarity are not worth showing.
const SIMILARITY_FLOOR: f64 = 0.3;

const MAX_SUGGESTIONS: usize = 3;

/// Machine-readable error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigError,
    ServerNotFound,
    ToolNotFound,
    ConnectionError,
    HandshakeTimeout,
    CallTimeout,
    ValidationError,
    ProtocolError,
    ToolExecutionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::ServerNotFound => "ServerNotFound",
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::HandshakeTimeout => "HandshakeTimeout",
            ErrorKind::CallTimeout => "CallTimeout",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::ToolExecutionError => "ToolExecutionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Configuration error: {reason}")]
    Config { reason: String, hint: Option<String> },

    #[error("Server '{name}' is not configured")]
    ServerNotFound {
        name: String,
        closest: Vec<String>,
        known: Vec<String>,
    },

    #[error("Tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        server: String,
        tool: String,
        closest: Vec<String>,
    },

    #[error("Could not connect to server '{server}': {reason}")]
    Connection {
        server: String,
        reason: String,
        missing_env: Option<String>,
        command: Option<String>,
    },

    #[error("Server '{server}' did not complete the handshake within {timeout_secs}s")]
    HandshakeTimeout {
        server: String,
        timeout_secs: u64,
        command: Option<String>,
    },

    #[error("Tool '{tool}' on server '{server}' did not respond within {timeout_secs}s")]
    CallTimeout {
        server: String,
        tool: String,
        timeout_secs: u64,
    },

    #[error("Invalid {subject}: {}", violations.join("; "))]
    Validation {
        subject: String,
        violations: Vec<String>,
        schema: Option<Value>,
    },

    #[error("Protocol error from server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    /// Remote tool reported failure. The message is the server's, verbatim.
    #[error("{message}")]
    ToolExecution {
        server: String,
        tool: String,
        message: String,
    },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Config { .. } => ErrorKind::ConfigError,
            GatewayError::ServerNotFound { .. } => ErrorKind::ServerNotFound,
            GatewayError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            GatewayError::Connection { .. } => ErrorKind::ConnectionError,
            GatewayError::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            GatewayError::CallTimeout { .. } => ErrorKind::CallTimeout,
            GatewayError::Validation { .. } => ErrorKind::ValidationError,
            GatewayError::Protocol { .. } => ErrorKind::ProtocolError,
            GatewayError::ToolExecution { .. } => ErrorKind::ToolExecutionError,
        }
    }

    /// Remediation hint for this failure.
    pub fn help(&self) -> String {
        match self {
            GatewayError::Config { hint, .. } => hint.clone().unwrap_or_else(|| {
                "Check your MCP config file (.mcp.json) and its 'mcpServers' entries.".to_string()
            }),
            GatewayError::ServerNotFound { closest, known, .. } => {
                if known.is_empty() {
                    return "No servers are configured. Add one under 'mcpServers' in .mcp.json."
                        .to_string();
                }
                let available = format!("Available servers: {}", known.join(", "));
                if closest.is_empty() {
                    available
                } else {
                    format!("Did you mean: {}? {}", closest.join(", "), available)
                }
            }
            GatewayError::ToolNotFound {
                server, closest, ..
            } => {
                let search = format!(
                    "Run 'mcpl search <query>' to find tools, or 'mcpl list {}' to see this server's tools.",
                    server
                );
                if closest.is_empty() {
                    search
                } else {
                    format!("Did you mean: {}? {}", closest.join(", "), search)
                }
            }
            GatewayError::Connection {
                server,
                missing_env,
                command,
                ..
            } => match (missing_env, command) {
                (Some(var), _) => format!(
                    "The '{}' server requires {} to be set. Add {}=your_value to your .env file \
                     (./.env or ~/.claude/.env) or export it in your environment.",
                    server, var, var
                ),
                (None, Some(command)) => format!(
                    "Make sure '{}' is installed and on your PATH, then run 'mcpl list' to check server status.",
                    command
                ),
                (None, None) => format!(
                    "Check the '{}' entry in your MCP config, then run 'mcpl list' to check server status.",
                    server
                ),
            },
            GatewayError::HandshakeTimeout { command, .. } => {
                let base = "The server may be slow to start or unresponsive. \
                            Raise MCPL_CONNECT_TIMEOUT if it needs longer.";
                match command {
                    Some(command) => {
                        format!("{} Try running '{}' manually to debug.", base, command)
                    }
                    None => base.to_string(),
                }
            }
            GatewayError::CallTimeout { .. } => {
                "The tool may still be running remotely. Retry, or raise MCPL_CALL_TIMEOUT for \
                 long-running tools. The next call starts a fresh session."
                    .to_string()
            }
            GatewayError::Validation { schema, .. } => match schema {
                Some(schema) => format!(
                    "Expected schema:\n{}",
                    serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
                ),
                None => "Check the input and try again.".to_string(),
            },
            GatewayError::Protocol { .. } => {
                "The server returned an unexpected response. Retry the command; if it keeps \
                 failing, run 'mcpl list --refresh'."
                    .to_string()
            }
            GatewayError::ToolExecution { server, tool, .. } => format!(
                "The tool reported an error. Check the arguments with 'mcpl inspect {} {} --example'.",
                server, tool
            ),
        }
    }

    /// Structured context for machine consumers, if this kind has any.
    pub fn details(&self) -> Option<Value> {
        match self {
            GatewayError::ServerNotFound { closest, known, .. } => {
                Some(json!({ "closest": closest, "available": known }))
            }
            GatewayError::ToolNotFound { closest, .. } if !closest.is_empty() => {
                Some(json!({ "closest": closest }))
            }
            GatewayError::Connection {
                missing_env: Some(var),
                ..
            } => Some(json!({ "missingEnv": var })),
            GatewayError::Validation {
                violations, schema, ..
            } => Some(json!({ "violations": violations, "schema": schema })),
            _ => None,
        }
    }

    /// `{type, message, help, ...details}`
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "type": self.kind().as_str(),
            "message": self.to_string(),
            "help": self.help(),
        });
        if let (Some(Value::Object(details)), Value::Object(map)) = (self.details(), &mut body) {
            map.extend(details);
        }
        body
    }

    pub fn config(reason: impl Into<String>) -> Self {
        GatewayError::Config {
            reason: reason.into(),
            hint: None,
        }
    }

    pub fn config_with_hint(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        GatewayError::Config {
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn server_not_found(name: &str, known: &[String]) -> Self {
        GatewayError::ServerNotFound {
            name: name.to_string(),
            closest: closest_matches(name, known.iter().map(String::as_str)),
            known: known.to_vec(),
        }
    }

    pub fn tool_not_found<'a>(
        server: &str,
        tool: &str,
        known: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        GatewayError::ToolNotFound {
            server: server.to_string(),
            tool: tool.to_string(),
            closest: closest_matches(tool, known),
        }
    }

    pub fn missing_env(server: &str, var: &str) -> Self {
        GatewayError::Connection {
            server: server.to_string(),
            reason: format!("Missing required environment variable: {}", var),
            missing_env: Some(var.to_string()),
            command: None,
        }
    }

    /// Classify a failure to launch a server process.
    pub fn from_spawn(server: &str, command: &str, err: &io::Error) -> Self {
        let reason = if err.kind() == io::ErrorKind::NotFound {
            format!("Command not found: {}", command)
        } else {
            format!("failed to start '{}': {}", command, err)
        };
        GatewayError::Connection {
            server: server.to_string(),
            reason,
            missing_env: None,
            command: Some(command.to_string()),
        }
    }

    pub fn protocol(server: &str, reason: impl fmt::Display) -> Self {
        GatewayError::Protocol {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures after which the session must not be reused.
    pub fn degrades_session(&self) -> bool {
        matches!(
            self,
            GatewayError::HandshakeTimeout { .. }
                | GatewayError::CallTimeout { .. }
                | GatewayError::Protocol { .. }
        )
    }
}

/// Up to three known names closest to `target`, best first.
pub fn closest_matches<'a>(
    target: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let target = target.to_lowercase();
    let mut scored: Vec<(&str, f64)> = candidates
        .into_iter()
        .map(|candidate| (candidate, similarity(&target, &candidate.to_lowercase())))
        .filter(|(_, score)| *score > SIMILARITY_FLOOR)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    scored.truncate(MAX_SUGGESTIONS);
    scored.into_iter().map(|(name, _)| name.to_string()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}
