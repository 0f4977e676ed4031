//! Tool discovery and execution across configured MCP servers.
//!
//! ## Modules
//!
//! - [`core`]: server registry, rmcp transports, sessions and call dispatch
//! - [`inventory`]: tool records, index snapshots and the on-disk cache
//! - [`search`]: bm25, regex and exact search over a snapshot
//! - [`error`]: the error taxonomy every failure is classified into

pub mod core;
pub mod error;
pub mod inventory;
pub mod search;

pub use core::{
    ArgumentSource, CallDispatcher, CallEnvelope, Connector, GatewayConfig, McpConnection,
    RemoteCallResult, RemoteTool, RmcpConnector, ServerRegistry, ServerSession, ServerSpec,
    ServerTransport, SessionManager, SessionState,
};
pub use error::{closest_matches, ErrorKind, GatewayError, GatewayResult};
pub use inventory::{
    BuildReport, FileIndexStore, IndexSnapshot, IndexStore, MemoryIndexStore, ServerIndexEntry,
    ToolIndex, ToolKey, ToolRecord,
};
pub use search::{search, SearchMethod, SearchResult};
