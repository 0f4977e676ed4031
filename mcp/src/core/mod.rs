//! Server configuration, transports, sessions and call dispatch.

pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod session;
pub mod transport;

pub use config::{fingerprint, GatewayConfig, ServerRegistry, ServerSpec, ServerTransport};
pub use dispatcher::{ArgumentSource, CallDispatcher, CallEnvelope};
pub use manager::SessionManager;
pub use session::{ServerSession, SessionState};
pub use transport::{Connector, McpConnection, RemoteCallResult, RemoteTool, RmcpConnector};
