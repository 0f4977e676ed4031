//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use launchpad_mcp::{
    core::config::{DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INDEX_TTL_SECS},
    search::DEFAULT_LIMIT,
    SearchMethod,
};

use crate::config::RuntimeSettings;

#[derive(Debug, Parser)]
#[command(
    name = "mcpl",
    version,
    about = "Search, inspect and call tools on your MCP servers"
)]
pub struct Cli {
    /// Emit structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "MCPL_JSON")]
    pub json: bool,

    /// Path to the MCP config file.
    #[arg(long, global = true, env = "MCPL_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to a .env file with server credentials.
    #[arg(long, global = true, env = "MCPL_ENV_FILE", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct RuntimeArgs {
    /// Seconds allowed for connecting and listing tools.
    #[arg(
        long,
        global = true,
        env = "MCPL_CONNECT_TIMEOUT",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        hide = true
    )]
    pub connect_timeout: u64,

    /// Seconds allowed for one tool call.
    #[arg(
        long,
        global = true,
        env = "MCPL_CALL_TIMEOUT",
        default_value_t = DEFAULT_CALL_TIMEOUT_SECS,
        hide = true
    )]
    pub call_timeout: u64,

    /// Seconds before the cached tool index is rebuilt.
    #[arg(
        long,
        global = true,
        env = "MCPL_INDEX_TTL",
        default_value_t = DEFAULT_INDEX_TTL_SECS,
        hide = true
    )]
    pub index_ttl: u64,

    /// Directory holding the tool index cache.
    #[arg(long, global = true, env = "MCPL_CACHE_DIR", value_name = "DIR", hide = true)]
    pub cache_dir: Option<PathBuf>,
}

impl RuntimeArgs {
    pub fn settings(&self) -> RuntimeSettings {
        RuntimeSettings::new(
            self.connect_timeout,
            self.call_timeout,
            self.index_ttl,
            self.cache_dir.clone(),
        )
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Find tools by keyword, pattern or substring.
    Search {
        query: String,

        #[arg(short, long, value_enum, default_value_t = MethodArg::Bm25)]
        method: MethodArg,

        /// Maximum number of results.
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Include the full schema and an example call for the top result.
        #[arg(long)]
        first: bool,
    },

    /// Show a tool's parameter schema.
    Inspect {
        server: String,
        tool: String,

        /// Append an example invocation.
        #[arg(long)]
        example: bool,
    },

    /// Call a tool with JSON arguments.
    Call {
        server: String,
        tool: String,

        /// JSON object of arguments, or `-` to read them from stdin.
        arguments: Option<String>,

        /// Read the JSON arguments from stdin.
        #[arg(long, conflicts_with = "arguments")]
        stdin: bool,
    },

    /// List configured servers, or the tools of one server.
    List {
        server: Option<String>,

        /// Rebuild the tool index before listing.
        #[arg(long)]
        refresh: bool,
    },

    /// Inspect session state.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Report the resident process and each server's session state.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Bm25,
    Regex,
    Exact,
}

impl From<MethodArg> for SearchMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Bm25 => SearchMethod::Bm25,
            MethodArg::Regex => SearchMethod::Regex,
            MethodArg::Exact => SearchMethod::Exact,
        }
    }
}
