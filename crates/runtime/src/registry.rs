//! Process-wide table of server connections and their lifecycle states.
//!
//! The registry is the single authority for whether a server is usable.
//! It is an explicit service object: build one at startup, share it by
//! reference or `Arc`, and call [`ConnectionRegistry::disconnect_all`] at
//! shutdown.
//!
//! State machine per server id:
//!
//! ```text
//! disconnected -> connecting -> connected | error
//! connected    -> disconnected            (disconnect)
//! error        -> connecting              (fresh connect)
//! ```
//!
//! A `connect` future dropped mid-attempt leaves the entry in `error`:
//!
//! ```text
//! connecting   -> error                   (connect cancelled)
//! ```
//!
//! Reads take a short synchronous lock and never wait on the network.
//! `connect`, `disconnect` and `refresh_capabilities` are serialized per id
//! so at most one connection attempt is in flight for a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use mcp::{CapabilitySet, Connector, ServerConfig, ServerSession, ToolInfo};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::capabilities::discover;
use crate::error::{Error, Result};

/// Lifecycle state of one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerState {
    pub id: String,
    pub status: ConnectionStatus,
    /// Failure message while `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Discovered capabilities; empty unless connected.
    pub capabilities: CapabilitySet,
}

impl ServerState {
    /// State reported for ids the registry has never seen.
    pub fn disconnected(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ConnectionStatus::Disconnected,
            error: None,
            capabilities: CapabilitySet::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Display summary of a connected server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub id: String,
    pub name: String,
    pub tools: Vec<ToolInfo>,
}

struct Entry<S> {
    name: String,
    state: ServerState,
    session: Option<Arc<S>>,
}

struct Table<S> {
    order: Vec<String>,
    entries: HashMap<String, Entry<S>>,
}

impl<S> Default for Table<S> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<S> Table<S> {
    fn in_order(&self) -> impl Iterator<Item = &Entry<S>> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    fn connected(&self) -> impl Iterator<Item = (&Entry<S>, &Arc<S>)> {
        self.in_order().filter_map(|entry| match &entry.session {
            Some(session) if entry.state.is_connected() => Some((entry, session)),
            _ => None,
        })
    }
}

type IdLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds the per-id lock; the map entry is dropped once nobody else waits on it.
struct IdGuard<'a> {
    locks: &'a IdLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(guard) = self.guard.take() {
            // One reference in the map, one in the guard.
            let idle = Arc::strong_count(OwnedMutexGuard::mutex(&guard)) == 2;
            drop(guard);
            if idle {
                locks.remove(&self.id);
            }
        }
    }
}

/// Moves an entry still `Connecting` to `Error` when its connect future is
/// dropped before finishing.
struct ConnectAttempt<'a, S> {
    table: &'a RwLock<Table<S>>,
    id: &'a str,
}

impl<S> Drop for ConnectAttempt<'_, S> {
    fn drop(&mut self) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = table.entries.get_mut(self.id) else {
            return;
        };
        if entry.state.status == ConnectionStatus::Connecting {
            warn!(server_id = self.id, "connect abandoned before completion");
            entry.state.status = ConnectionStatus::Error;
            entry.state.error = Some(CONNECT_CANCELLED.to_string());
            entry.session = None;
        }
    }
}

const CONNECT_CANCELLED: &str = "connect cancelled";

/// Registry of tool-server connections keyed by server id.
pub struct ConnectionRegistry<C: Connector> {
    connector: C,
    table: RwLock<Table<C::Session>>,
    locks: IdLocks,
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            table: RwLock::new(Table::default()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to the server described by `config`.
    ///
    /// Returns the existing state unchanged when the id is already
    /// connected. Any failure leaves the entry in `Error` with the message
    /// recorded and is also returned to the caller. An invalid
    /// configuration fails before any I/O.
    pub async fn connect(&self, config: &ServerConfig) -> Result<ServerState> {
        let _guard = self.lock_id(&config.id).await;

        if let Some(state) = self.connected_state(&config.id) {
            debug!(server_id = %config.id, "already connected");
            return Ok(state);
        }

        self.mark_connecting(config);
        let _attempt = ConnectAttempt {
            table: &self.table,
            id: &config.id,
        };
        info!(server_id = %config.id, transport = %config.transport, "connecting");

        if let Err(e) = config.validate() {
            return Err(self.mark_failed(&config.id, e.into()));
        }

        let session = match self.connector.open(config).await {
            Ok(session) => Arc::new(session),
            Err(e) => return Err(self.mark_failed(&config.id, e.into())),
        };

        let capabilities = discover(&config.id, session.as_ref()).await;
        self.warn_on_collisions(&config.id, &capabilities);

        let state = ServerState {
            id: config.id.clone(),
            status: ConnectionStatus::Connected,
            error: None,
            capabilities,
        };
        if let Some(entry) = self.write().entries.get_mut(&config.id) {
            entry.state = state.clone();
            entry.session = Some(session);
        }

        info!(
            server_id = %config.id,
            tools = state.capabilities.tools.len(),
            prompts = state.capabilities.prompts.len(),
            resources = state.capabilities.resources.len(),
            "connected"
        );
        Ok(state)
    }

    /// Close the live connection for `id`, if any, and mark it disconnected.
    ///
    /// Close failures are logged and swallowed. Unknown ids are a no-op.
    pub async fn disconnect(&self, id: &str) {
        let _guard = self.lock_id(id).await;

        let session = {
            let mut table = self.write();
            let Some(entry) = table.entries.get_mut(id) else {
                return;
            };
            entry.state = ServerState::disconnected(id);
            entry.session.take()
        };

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(server_id = id, error = %e, "error while closing connection");
            }
            info!(server_id = id, "disconnected");
        }
    }

    /// Disconnect every known server concurrently.
    pub async fn disconnect_all(&self) {
        let ids = self.read().order.clone();
        info!(count = ids.len(), "disconnecting all servers");
        join_all(ids.iter().map(|id| self.disconnect(id))).await;
    }

    /// Re-run capability discovery on a connected server.
    pub async fn refresh_capabilities(&self, id: &str) -> Result<ServerState> {
        let _guard = self.lock_id(id).await;

        let session = self
            .live_session(id)
            .ok_or_else(|| Error::NotConnected(id.to_string()))?;

        let capabilities = discover(id, session.as_ref()).await;
        let mut table = self.write();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotConnected(id.to_string()))?;
        entry.state.capabilities = capabilities;
        debug!(server_id = id, "capabilities refreshed");
        Ok(entry.state.clone())
    }

    /// Current state of `id`; unknown ids report `Disconnected`.
    pub fn get_state(&self, id: &str) -> ServerState {
        self.read()
            .entries
            .get(id)
            .map(|entry| entry.state.clone())
            .unwrap_or_else(|| ServerState::disconnected(id))
    }

    /// States of every known server in insertion order.
    pub fn all_states(&self) -> Vec<ServerState> {
        self.read()
            .in_order()
            .map(|entry| entry.state.clone())
            .collect()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.read()
            .entries
            .get(id)
            .is_some_and(|entry| entry.state.is_connected())
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.read()
            .connected()
            .map(|(entry, _)| entry.state.id.clone())
            .collect()
    }

    pub fn connected_servers(&self) -> Vec<ServerSummary> {
        self.read()
            .connected()
            .map(|(entry, _)| ServerSummary {
                id: entry.state.id.clone(),
                name: entry.name.clone(),
                tools: entry.state.capabilities.tools.clone(),
            })
            .collect()
    }

    /// Number of tools across every connected server.
    pub fn total_tool_count(&self) -> usize {
        self.read()
            .connected()
            .map(|(entry, _)| entry.state.capabilities.tools.len())
            .sum()
    }

    pub(crate) fn live_session(&self, id: &str) -> Option<Arc<C::Session>> {
        let table = self.read();
        let entry = table.entries.get(id)?;
        match &entry.session {
            Some(session) if entry.state.is_connected() => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Capability sets of connected servers in insertion order.
    pub(crate) fn connected_capabilities(&self) -> Vec<CapabilitySet> {
        self.read()
            .connected()
            .map(|(entry, _)| entry.state.capabilities.clone())
            .collect()
    }

    /// First connected server, in insertion order, exposing `tool`.
    pub(crate) fn tool_owner(&self, tool: &str) -> Option<(String, Arc<C::Session>)> {
        self.read()
            .connected()
            .find(|(entry, _)| entry.state.capabilities.has_tool(tool))
            .map(|(entry, session)| (entry.state.id.clone(), Arc::clone(session)))
    }

    fn connected_state(&self, id: &str) -> Option<ServerState> {
        self.read()
            .entries
            .get(id)
            .filter(|entry| entry.state.is_connected())
            .map(|entry| entry.state.clone())
    }

    fn mark_connecting(&self, config: &ServerConfig) {
        let mut table = self.write();
        if !table.entries.contains_key(&config.id) {
            table.order.push(config.id.clone());
        }
        table.entries.insert(
            config.id.clone(),
            Entry {
                name: config.name.clone(),
                state: ServerState {
                    status: ConnectionStatus::Connecting,
                    ..ServerState::disconnected(&config.id)
                },
                session: None,
            },
        );
    }

    fn mark_failed(&self, id: &str, error: Error) -> Error {
        warn!(server_id = id, %error, "connection failed");
        if let Some(entry) = self.write().entries.get_mut(id) {
            entry.state.status = ConnectionStatus::Error;
            entry.state.error = Some(error.to_string());
            entry.session = None;
        }
        error
    }

    fn warn_on_collisions(&self, id: &str, capabilities: &CapabilitySet) {
        let table = self.read();
        let position = |server: &str| table.order.iter().position(|known| known == server);
        for (entry, _) in table.connected() {
            let other = &entry.state.id;
            if other == id {
                continue;
            }
            for tool in &capabilities.tools {
                if entry.state.capabilities.has_tool(&tool.name) {
                    let (winner, shadowed) = if position(other) < position(id) {
                        (other.as_str(), id)
                    } else {
                        (id, other.as_str())
                    };
                    warn!(
                        tool = %tool.name,
                        server_id = winner,
                        shadowed,
                        "tool name exposed by more than one server; calls go to the earlier one"
                    );
                }
            }
        }
    }

    async fn lock_id(&self, id: &str) -> IdGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        IdGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table<C::Session>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table<C::Session>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}
