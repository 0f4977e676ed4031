//! Per-server session and its lifecycle state machine.
//!
//! ```text
//! Unconnected -> Connecting -> Ready -> Degraded -> Closed
//!                    |           |                   ^
//!                    +-> Degraded +-------------------+
//! ```
//!
//! A degraded session is never reused; the manager retires it and the next
//! acquire creates a fresh one. `Closed` is terminal.

use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::transport::{McpConnection, RemoteCallResult, RemoteTool};
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unconnected, Connecting)
                | (Unconnected, Closed)
                | (Connecting, Ready)
                | (Connecting, Degraded)
                | (Connecting, Closed)
                | (Ready, Degraded)
                | (Ready, Closed)
                | (Degraded, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Established {
    connection: Box<dyn McpConnection>,
    tools: Vec<RemoteTool>,
}

/// Live handle to one server.
///
/// Created in `Connecting`; the connection is attached once the handshake
/// and tool listing succeed.
pub struct ServerSession {
    server: String,
    attempt: u64,
    state: Mutex<SessionState>,
    established: OnceLock<Established>,
    last_activity: Mutex<Instant>,
    last_error: Mutex<Option<GatewayError>>,
    /// Serializes calls so request/response pairs never interleave.
    call_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("server", &self.server)
            .field("attempt", &self.attempt)
            .field("state", &self.state())
            .finish()
    }
}

impl ServerSession {
    pub(crate) fn connecting(server: &str, attempt: u64) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            attempt,
            state: Mutex::new(SessionState::Connecting),
            established: OnceLock::new(),
            last_activity: Mutex::new(Instant::now()),
            last_error: Mutex::new(None),
            call_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Connection attempt number that produced this session (1-based).
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Tools advertised during the handshake.
    pub fn tools(&self) -> &[RemoteTool] {
        self.established
            .get()
            .map(|e| e.tools.as_slice())
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<GatewayError> {
        self.last_error.lock().clone()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Attempt a lifecycle transition; returns false if the edge is invalid.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!("Session '{}' {} -> {}", self.server, *state, next);
            *state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn establish(
        &self,
        connection: Box<dyn McpConnection>,
        tools: Vec<RemoteTool>,
    ) -> GatewayResult<()> {
        self.established
            .set(Established { connection, tools })
            .map_err(|_| GatewayError::protocol(&self.server, "session already established"))?;
        if self.transition(SessionState::Ready) {
            self.touch();
            Ok(())
        } else {
            Err(GatewayError::protocol(
                &self.server,
                format!("session became {} during handshake", self.state()),
            ))
        }
    }

    /// Record `error` and move to `Degraded` (or `Closed` for non-degrading failures).
    pub(crate) fn fail(&self, error: &GatewayError) {
        *self.last_error.lock() = Some(error.clone());
        let next = if error.degrades_session() {
            SessionState::Degraded
        } else {
            SessionState::Closed
        };
        if !self.transition(next) && next == SessionState::Degraded {
            self.transition(SessionState::Closed);
        }
    }

    /// Forward one call, bounded by `timeout` once this call reaches the front of the queue.
    ///
    /// A timeout or transport failure degrades the session.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> GatewayResult<RemoteCallResult> {
        let _guard = self.call_lock.lock().await;

        let connection = match (self.state(), self.established.get()) {
            (SessionState::Ready, Some(established)) => &established.connection,
            (state, _) => {
                return Err(GatewayError::protocol(
                    &self.server,
                    format!("session is {}", state),
                ))
            }
        };

        self.touch();
        let outcome = tokio::time::timeout(timeout, connection.call_tool(tool, arguments)).await;
        self.touch();

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                if e.degrades_session() {
                    warn!("Session '{}' degraded: {}", self.server, e);
                    self.fail(&e);
                }
                Err(e)
            }
            Err(_) => {
                let err = GatewayError::CallTimeout {
                    server: self.server.clone(),
                    tool: tool.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                warn!(
                    "Call to '{}' on '{}' timed out after {:?}",
                    tool, self.server, timeout
                );
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// True while a call holds the session.
    pub fn is_busy(&self) -> bool {
        self.call_lock.try_lock().is_err()
    }

    /// Close the underlying connection and mark the session `Closed`.
    pub async fn close(&self) {
        if let Some(established) = self.established.get() {
            established.connection.close().await;
        }
        let mut state = self.state.lock();
        if *state != SessionState::Closed {
            debug!("Session '{}' {} -> closed", self.server, *state);
            *state = SessionState::Closed;
        }
    }
}
