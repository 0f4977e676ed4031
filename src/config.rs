//! Configuration discovery and loading.
//!
//! Reads the `mcpServers` map from the first config file found, loads an
//! optional `.env` file into the process environment, and resolves every
//! `${VAR}` reference into a [`ServerRegistry`].

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use launchpad_mcp::{
    core::{GatewayConfig, ServerRegistry, ServerSpec, ServerTransport},
    GatewayError, GatewayResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Project-level config locations, relative to the working directory.
pub const PROJECT_CONFIG_PATHS: [&str; 3] = [".mcp.json", "mcp.json", ".claude/mcp.json"];

/// User-level config location, relative to the home directory.
pub const USER_CONFIG_PATH: &str = ".claude/mcp.json";

pub const PROJECT_ENV_PATH: &str = ".env";
pub const USER_ENV_PATH: &str = ".claude/.env";

static VAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

const EXAMPLE_CONFIG: &str = r#"{
  "mcpServers": {
    "github": {
      "command": "uvx",
      "args": ["mcp-server-github"],
      "env": {"GITHUB_TOKEN": "${GITHUB_TOKEN}"}
    }
  }
}"#;

/// Directories searched during discovery.
#[derive(Debug, Clone)]
pub struct SearchRoots {
    pub cwd: PathBuf,
    pub home: Option<PathBuf>,
}

impl SearchRoots {
    pub fn from_process() -> Self {
        Self {
            cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: dirs::home_dir(),
        }
    }

    fn config_candidates(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> =
            PROJECT_CONFIG_PATHS.iter().map(|p| self.cwd.join(p)).collect();
        if let Some(home) = &self.home {
            candidates.push(home.join(USER_CONFIG_PATH));
        }
        candidates
    }

    fn env_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = vec![self.cwd.join(PROJECT_ENV_PATH)];
        if let Some(home) = &self.home {
            candidates.push(home.join(USER_ENV_PATH));
        }
        candidates
    }
}

/// Locate the config file. An explicit path wins and must exist.
pub fn find_config_file(explicit: Option<&Path>, roots: &SearchRoots) -> GatewayResult<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(GatewayError::config_with_hint(
                format!("Config file not found: {}", path.display()),
                "Check the --config path (or MCPL_CONFIG).",
            ))
        };
    }

    let candidates = roots.config_candidates();
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }

    let searched = candidates
        .iter()
        .map(|p| format!("  {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(GatewayError::config_with_hint(
        "No MCP config file found",
        format!(
            "Searched locations:\n{}\n\nCreate a config file with your MCP servers. Example:\n\n{}",
            searched, EXAMPLE_CONFIG
        ),
    ))
}

/// Locate the env file, if any. An explicit path must exist.
pub fn find_env_file(
    explicit: Option<&Path>,
    roots: &SearchRoots,
) -> GatewayResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(Some(path.to_path_buf()))
        } else {
            Err(GatewayError::config_with_hint(
                format!("Env file not found: {}", path.display()),
                "Check the --env-file path (or MCPL_ENV_FILE).",
            ))
        };
    }
    Ok(roots.env_candidates().into_iter().find(|p| p.is_file()))
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Export variables from `path` that are not already set. Returns how many were set.
pub fn load_env_file(path: &Path) -> GatewayResult<usize> {
    let contents = fs::read_to_string(path).map_err(|e| {
        GatewayError::config(format!("Failed to read env file {}: {}", path.display(), e))
    })?;

    let mut loaded = 0;
    for (key, value) in parse_env_file(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            loaded += 1;
        }
    }
    debug!("Loaded {} variables from {}", loaded, path.display());
    Ok(loaded)
}

/// Replace every `${VAR}` in `text`. Unset or empty variables become `""`
/// and are appended to `missing`.
pub fn substitute(
    text: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    missing: &mut Vec<String>,
) -> String {
    VAR_REF
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(value) => value,
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    String::new()
                }
            }
        })
        .into_owned()
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One server entry as written in the file. An explicit `null` counts as absent.
#[derive(Debug, Deserialize)]
struct RawServer {
    command: Option<String>,
    args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    url: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl RawServer {
    fn declared(self, name: &str) -> GatewayResult<ServerTransport> {
        match (self.command, self.url) {
            (Some(command), _) => Ok(ServerTransport::Stdio {
                command,
                args: self.args.unwrap_or_default(),
                env: self.env.unwrap_or_default(),
            }),
            (None, Some(url)) => match self.kind.as_deref() {
                None | Some("http") | Some("streamable-http") | Some("streamable_http") => {
                    Ok(ServerTransport::Http {
                        url,
                        headers: self.headers.unwrap_or_default(),
                    })
                }
                Some("sse") => Ok(ServerTransport::Sse {
                    url,
                    headers: self.headers.unwrap_or_default(),
                }),
                Some(other) => Err(GatewayError::config(format!(
                    "server '{}' has unsupported type '{}' (expected http, streamable-http or sse)",
                    name, other
                ))),
            },
            (None, None) => Err(GatewayError::config_with_hint(
                format!("server '{}' has neither 'command' nor 'url'", name),
                format!(
                    "Add \"command\" (process server) or \"url\" (network server) under mcpServers.{}.",
                    name
                ),
            )),
        }
    }
}

fn resolve(
    declared: &ServerTransport,
    lookup: &impl Fn(&str) -> Option<String>,
    missing: &mut Vec<String>,
) -> ServerTransport {
    let map = |m: &BTreeMap<String, String>, missing: &mut Vec<String>| {
        m.iter()
            .map(|(k, v)| (k.clone(), substitute(v, lookup, missing)))
            .collect::<BTreeMap<_, _>>()
    };
    match declared {
        ServerTransport::Stdio { command, args, env } => ServerTransport::Stdio {
            command: command.clone(),
            args: args.iter().map(|a| substitute(a, lookup, missing)).collect(),
            env: map(env, missing),
        },
        ServerTransport::Http { url, headers } => ServerTransport::Http {
            url: substitute(url, lookup, missing),
            headers: map(headers, missing),
        },
        ServerTransport::Sse { url, headers } => ServerTransport::Sse {
            url: substitute(url, lookup, missing),
            headers: map(headers, missing),
        },
    }
}

/// Parse config text into a registry, resolving variables through `lookup`.
pub fn parse_registry(
    contents: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> GatewayResult<ServerRegistry> {
    let file: ConfigFile = serde_json::from_str(contents)
        .map_err(|e| GatewayError::config(format!("Invalid JSON in config file: {}", e)))?;

    let servers = file.mcp_servers.unwrap_or_default();
    let mut specs = Vec::with_capacity(servers.len());
    for (name, value) in servers {
        let raw: RawServer = serde_json::from_value(value).map_err(|e| {
            GatewayError::config(format!("Invalid entry for server '{}': {}", name, e))
        })?;
        let declared = raw.declared(&name)?;
        let mut missing = Vec::new();
        let resolved = resolve(&declared, &lookup, &mut missing);
        specs.push(ServerSpec::new(name, &declared, resolved, missing)?);
    }
    ServerRegistry::new(specs)
}

/// The immutable result of configuration discovery for one run.
#[derive(Debug)]
pub struct LoadedConfig {
    pub registry: ServerRegistry,
    pub config_path: PathBuf,
    pub env_path: Option<PathBuf>,
}

/// Discover, read and resolve the configuration.
pub fn load(
    explicit_config: Option<&Path>,
    explicit_env: Option<&Path>,
    roots: &SearchRoots,
) -> GatewayResult<LoadedConfig> {
    let env_path = find_env_file(explicit_env, roots)?;
    if let Some(path) = &env_path {
        load_env_file(path)?;
    }

    let config_path = find_config_file(explicit_config, roots)?;
    let contents = fs::read_to_string(&config_path).map_err(|e| {
        GatewayError::config(format!(
            "Failed to read config file {}: {}",
            config_path.display(),
            e
        ))
    })?;
    let registry = parse_registry(&contents, |name| env::var(name).ok())?;
    debug!(
        "Loaded {} servers from {}",
        registry.len(),
        config_path.display()
    );

    Ok(LoadedConfig {
        registry,
        config_path,
        env_path,
    })
}

/// Timeouts and cache placement for one run.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub gateway: GatewayConfig,
    pub cache_dir: PathBuf,
}

impl RuntimeSettings {
    pub fn new(
        connect_timeout_secs: u64,
        call_timeout_secs: u64,
        index_ttl_secs: u64,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            gateway: GatewayConfig {
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                call_timeout: Duration::from_secs(call_timeout_secs),
                index_ttl: Duration::from_secs(index_ttl_secs),
                ..GatewayConfig::default()
            },
            cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("mcpl")
}
