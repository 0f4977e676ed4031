//! Session management.
//!
//! Owns zero-or-one live session per configured server. Sessions are created
//! lazily on first `acquire`; concurrent acquirers of the same server share
//! one in-flight connection attempt. Sessions that time out or hit a protocol
//! error are retired and closed on teardown; idle sessions are evicted.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    config::{GatewayConfig, ServerRegistry, ServerSpec, ServerTransport},
    session::{ServerSession, SessionState},
    transport::Connector,
};
use crate::error::{GatewayError, GatewayResult};

type ConnectFuture = Shared<BoxFuture<'static, GatewayResult<Arc<ServerSession>>>>;

#[derive(Default)]
enum SlotState {
    #[default]
    Idle,
    Connecting {
        attempt: u64,
        session: Arc<ServerSession>,
        future: ConnectFuture,
    },
    Live(Arc<ServerSession>),
    /// Last attempt failed or the session was degraded; the next acquire reconnects.
    Retired(Arc<ServerSession>),
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    attempts: Mutex<u64>,
}

pub struct SessionManager {
    registry: Arc<ServerRegistry>,
    connector: Arc<dyn Connector>,
    config: GatewayConfig,
    slots: DashMap<String, Arc<Slot>>,
    /// Degraded sessions whose resources are released on `close_all`.
    abandoned: Mutex<Vec<Arc<ServerSession>>>,
    shut_down: AtomicBool,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ServerRegistry>,
        connector: Arc<dyn Connector>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            config,
            slots: DashMap::new(),
            abandoned: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the ready session for `server`, connecting if there is none.
    ///
    /// Unknown servers fail with `ServerNotFound` before any connection attempt.
    pub async fn acquire(&self, server: &str) -> GatewayResult<Arc<ServerSession>> {
        let spec = self
            .registry
            .get(server)
            .ok_or_else(|| self.registry.not_found(server))?;

        if self.shut_down.load(Ordering::Acquire) {
            return Err(GatewayError::protocol(server, "session manager is shut down"));
        }

        let slot = self
            .slots
            .entry(server.to_string())
            .or_default()
            .clone();

        let (attempt, future) = {
            let mut state = slot.state.lock();
            match &*state {
                SlotState::Live(session) if session.is_ready() => {
                    session.touch();
                    return Ok(session.clone());
                }
                SlotState::Connecting {
                    attempt, future, ..
                } => {
                    debug!("Waiting on in-flight connection to '{}'", server);
                    (*attempt, future.clone())
                }
                _ => {
                    if let SlotState::Live(stale) | SlotState::Retired(stale) =
                        std::mem::take(&mut *state)
                    {
                        self.abandon(stale);
                    }
                    let attempt = {
                        let mut attempts = slot.attempts.lock();
                        *attempts += 1;
                        *attempts
                    };
                    let session = ServerSession::connecting(server, attempt);
                    let future = self.connect_future(spec.clone(), session.clone());
                    *state = SlotState::Connecting {
                        attempt,
                        session,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        // First waiter to finish publishes the outcome for this attempt.
        let mut state = slot.state.lock();
        let current_attempt = matches!(
            &*state,
            SlotState::Connecting { attempt: current, .. } if *current == attempt
        );
        if current_attempt {
            *state = match (&result, std::mem::take(&mut *state)) {
                (Ok(session), _) => SlotState::Live(session.clone()),
                (Err(_), SlotState::Connecting { session, .. }) => SlotState::Retired(session),
                (Err(_), other) => other,
            };
        }
        drop(state);
        result
    }

    fn connect_future(&self, spec: ServerSpec, session: Arc<ServerSession>) -> ConnectFuture {
        let connector = self.connector.clone();
        let timeout = self.config.connect_timeout;

        async move {
            if let Some(var) = spec.missing_env.first() {
                let err = GatewayError::missing_env(&spec.name, var);
                session.fail(&err);
                return Err(err);
            }

            let handshake = async {
                let connection = connector.connect(&spec).await?;
                match connection.list_tools().await {
                    Ok(tools) => Ok((connection, tools)),
                    Err(e) => {
                        connection.close().await;
                        Err(e)
                    }
                }
            };

            match tokio::time::timeout(timeout, handshake).await {
                Ok(Ok((connection, tools))) => {
                    let count = tools.len();
                    if let Err(e) = session.establish(connection, tools) {
                        session.close().await;
                        return Err(e);
                    }
                    info!(
                        "Session '{}' ready with {} tools (attempt {})",
                        spec.name,
                        count,
                        session.attempt()
                    );
                    Ok(session)
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to '{}': {}", spec.name, e);
                    session.fail(&e);
                    Err(e)
                }
                Err(_) => {
                    let err = GatewayError::HandshakeTimeout {
                        server: spec.name.clone(),
                        timeout_secs: timeout.as_secs(),
                        command: match &spec.transport {
                            ServerTransport::Stdio { .. } => {
                                Some(spec.transport.display_target())
                            }
                            _ => None,
                        },
                    };
                    warn!("{}", err);
                    session.fail(&err);
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Return a session after use. Degraded sessions are retired.
    pub fn release(&self, session: &Arc<ServerSession>) {
        session.touch();
        if session.state() == SessionState::Degraded {
            self.retire(session);
        }
    }

    /// Mark `session` degraded so it is never handed out again.
    pub fn discard(&self, session: &Arc<ServerSession>, error: &GatewayError) {
        session.fail(error);
        self.retire(session);
    }

    fn retire(&self, session: &Arc<ServerSession>) {
        let Some(slot) = self.slots.get(session.server()).map(|s| s.clone()) else {
            return;
        };
        let mut state = slot.state.lock();
        if let SlotState::Live(current) = &*state {
            if Arc::ptr_eq(current, session) {
                info!(
                    "Retiring {} session for '{}'",
                    session.state(),
                    session.server()
                );
                *state = SlotState::Retired(session.clone());
                self.abandon(session.clone());
            }
        }
    }

    fn abandon(&self, session: Arc<ServerSession>) {
        if session.state() == SessionState::Degraded {
            let mut abandoned = self.abandoned.lock();
            if !abandoned.iter().any(|s| Arc::ptr_eq(s, &session)) {
                abandoned.push(session);
            }
        }
    }

    /// Lifecycle state of `server`'s current session, `None` if not configured.
    pub fn state(&self, server: &str) -> Option<SessionState> {
        if !self.registry.contains(server) {
            return None;
        }
        let Some(slot) = self.slots.get(server).map(|s| s.clone()) else {
            return Some(SessionState::Unconnected);
        };
        let state = slot.state.lock();
        Some(match &*state {
            SlotState::Idle => SessionState::Unconnected,
            SlotState::Connecting { session, .. } => session.state(),
            SlotState::Live(session) | SlotState::Retired(session) => session.state(),
        })
    }

    /// Every configured server with its session state, in registry order.
    pub fn states(&self) -> Vec<(String, SessionState)> {
        self.registry
            .iter()
            .map(|spec| {
                let state = self.state(&spec.name).unwrap_or(SessionState::Unconnected);
                (spec.name.clone(), state)
            })
            .collect()
    }

    /// Number of connection attempts started for `server` in this process.
    pub fn connect_attempts(&self, server: &str) -> u64 {
        self.slots
            .get(server)
            .map(|slot| *slot.attempts.lock())
            .unwrap_or(0)
    }

    /// Close ready sessions idle for longer than the configured window.
    ///
    /// Returns the names of evicted servers.
    pub async fn evict_idle(&self) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout;
        let mut evicted = Vec::new();

        let slots: Vec<Arc<Slot>> = self.slots.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            let session = {
                let mut state = slot.state.lock();
                match &*state {
                    SlotState::Live(session)
                        if session.idle_for() >= idle_timeout && !session.is_busy() =>
                    {
                        let session = session.clone();
                        *state = SlotState::Idle;
                        session
                    }
                    _ => continue,
                }
            };
            info!(
                "Evicting session '{}' idle for {:?}",
                session.server(),
                session.idle_for()
            );
            session.close().await;
            evicted.push(session.server().to_string());
        }

        evicted
    }

    /// Periodically evict idle sessions until the manager shuts down.
    pub fn spawn_idle_reaper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if self.shut_down.load(Ordering::Acquire) {
                    break;
                }
                let evicted = self.evict_idle().await;
                if !evicted.is_empty() {
                    debug!("Idle reaper closed {} sessions", evicted.len());
                }
            }
        })
    }

    /// Close every session, including abandoned degraded ones.
    pub async fn close_all(&self) {
        self.shut_down.store(true, Ordering::Release);

        let mut to_close = Vec::new();
        for entry in self.slots.iter() {
            let mut state = entry.value().state.lock();
            match std::mem::take(&mut *state) {
                SlotState::Live(session) | SlotState::Retired(session) => to_close.push(session),
                SlotState::Connecting { session, .. } => {
                    // Dropping the shared future cancels the attempt once no waiter polls it.
                    to_close.push(session);
                }
                SlotState::Idle => {}
            }
        }
        to_close.append(&mut self.abandoned.lock());

        let mut closed = 0usize;
        for session in &to_close {
            if session.state() != SessionState::Closed {
                session.close().await;
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Closed {} MCP sessions", closed);
        }
    }
}
