//! Client registry.
//!
//! Tracks every live client keyed by [`ClientId`], together with its role,
//! lifecycle state, socket connection and (for clients the hub launched) the
//! owned process handle. Dropping an entry tears all of that down.
//!
//! The registry enforces the single-primary invariant: a second primary
//! registration is refused with [`HubError::DoublePrimary`], which the hub
//! treats as fatal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{ClientId, ClientRole, ClientState, WorkerTask};
use crate::error::HubError;
use crate::hub::events::ConnId;
use crate::launcher::LaunchedProcess;
use crate::socket::client_conn::ClientConn;
use crate::socket::framing::Envelope;

/// Something to hand a client once it signals readiness.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingDelivery {
    /// A fixed message, e.g. parse instructions.
    Message(Envelope),
    /// The session data as it is at the moment of delivery.
    SessionData,
}

/// A registered client.
#[derive(Debug)]
pub struct ClientEntry {
    id: ClientId,
    role: ClientRole,
    state: ClientState,
    task: Option<WorkerTask>,
    conn: Option<ClientConn>,
    process: Option<LaunchedProcess>,
    pending: Vec<PendingDelivery>,
    created_at: Instant,
}

impl ClientEntry {
    fn new(id: ClientId, role: ClientRole, task: Option<WorkerTask>) -> Self {
        Self {
            id,
            role,
            state: ClientState::Created,
            task,
            conn: None,
            process: None,
            pending: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Client identifier.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Client role.
    pub fn role(&self) -> ClientRole {
        self.role
    }

    /// Lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Worker task, if this is a worker the hub spawned.
    pub fn task(&self) -> Option<WorkerTask> {
        self.task
    }

    /// Live connection, if the client has connected.
    pub fn conn(&self) -> Option<&ClientConn> {
        self.conn.as_ref()
    }

    /// Connection id, if the client has connected.
    pub fn conn_id(&self) -> Option<&ConnId> {
        self.conn.as_ref().map(ClientConn::conn_id)
    }

    /// Deliveries waiting for readiness.
    pub fn pending(&self) -> &[PendingDelivery] {
        &self.pending
    }

    /// OS process id of the launched process, while it runs.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(LaunchedProcess::pid)
    }

    /// Tear down the connection and process. Consumes the entry.
    fn close(mut self) -> ClientId {
        self.state = ClientState::Closed;
        if let Some(conn) = self.conn.take() {
            conn.disconnect();
        }
        if let Some(process) = self.process.take() {
            process.terminate();
        }
        log::info!("[Registry] Closed client {} ({})", self.id, self.role);
        self.id
    }
}

/// Registry of all live clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientEntry>,
    primary: Option<ClientId>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DoublePrimary`] if `role` is primary and a
    /// primary is already registered.
    pub fn register(&mut self, role: ClientRole) -> Result<ClientId, HubError> {
        self.insert(role, None)
    }

    /// Register a worker spawned for `task`.
    pub fn register_worker(&mut self, task: WorkerTask) -> ClientId {
        let id = ClientId::generate(ClientRole::Worker);
        self.clients
            .insert(id.clone(), ClientEntry::new(id.clone(), ClientRole::Worker, Some(task)));
        log::debug!("[Registry] Registered worker {} for {:?}", id, task);
        id
    }

    fn insert(&mut self, role: ClientRole, task: Option<WorkerTask>) -> Result<ClientId, HubError> {
        if role == ClientRole::Primary {
            if let Some(existing) = &self.primary {
                return Err(HubError::DoublePrimary {
                    existing: existing.clone(),
                });
            }
        }

        let id = ClientId::generate(role);
        self.clients
            .insert(id.clone(), ClientEntry::new(id.clone(), role, task));
        if role == ClientRole::Primary {
            self.primary = Some(id.clone());
        }
        log::debug!("[Registry] Registered {} client {}", role, id);
        Ok(id)
    }

    /// Bind a connection to a registered client.
    ///
    /// A previous connection for the same client is disconnected.
    pub fn attach(&mut self, id: &ClientId, conn: ClientConn) -> Result<(), HubError> {
        let entry = self
            .clients
            .get_mut(id)
            .ok_or_else(|| HubError::ClientVanished(id.clone()))?;
        if let Some(old) = entry.conn.replace(conn) {
            log::warn!("[Registry] Client {} reconnected, dropping {}", id, old.conn_id());
            old.disconnect();
        }
        Ok(())
    }

    /// Hand ownership of a launched process to its client entry.
    pub fn set_process(&mut self, id: &ClientId, process: LaunchedProcess) {
        match self.clients.get_mut(id) {
            Some(entry) => entry.process = Some(process),
            None => process.terminate(),
        }
    }

    /// Queue something for delivery once the client is `Ready`.
    pub fn queue_on_ready(&mut self, id: &ClientId, delivery: PendingDelivery) {
        if let Some(entry) = self.clients.get_mut(id) {
            entry.pending.push(delivery);
        }
    }

    /// Move a client to `Ready` and take its queued deliveries.
    ///
    /// Readiness is one-shot: a repeated signal yields nothing further.
    pub fn mark_ready(&mut self, id: &ClientId) -> Result<Vec<PendingDelivery>, HubError> {
        let entry = self
            .clients
            .get_mut(id)
            .ok_or_else(|| HubError::ClientVanished(id.clone()))?;
        entry.state = ClientState::Ready;
        Ok(std::mem::take(&mut entry.pending))
    }

    /// Close and purge a client.
    ///
    /// Returns the closed entry's connection id, if it had one, so the
    /// caller can forget the connection mapping.
    pub fn unregister(&mut self, id: &ClientId) -> Option<Option<ConnId>> {
        let entry = self.clients.remove(id)?;
        if self.primary.as_ref() == Some(id) {
            self.primary = None;
        }
        let conn_id = entry.conn_id().cloned();
        entry.close();
        Some(conn_id)
    }

    /// Close every client except `keep`.
    ///
    /// Returns the connection ids of the closed clients.
    pub fn close_all_except(&mut self, keep: Option<&ClientId>) -> Vec<ConnId> {
        let doomed: Vec<ClientId> = self
            .clients
            .keys()
            .filter(|id| Some(*id) != keep)
            .cloned()
            .collect();
        self.close_many(&doomed)
    }

    /// Close every parsing worker, leaving other clients untouched.
    pub fn cancel_parsing(&mut self) -> Vec<ConnId> {
        let doomed: Vec<ClientId> = self
            .clients
            .values()
            .filter(|entry| entry.task == Some(WorkerTask::ParseFiles))
            .map(|entry| entry.id.clone())
            .collect();
        if doomed.is_empty() {
            log::debug!("[Registry] No parsing worker to cancel");
        }
        self.close_many(&doomed)
    }

    fn close_many(&mut self, ids: &[ClientId]) -> Vec<ConnId> {
        ids.iter()
            .filter_map(|id| self.unregister(id).flatten())
            .collect()
    }

    /// Clients still `Created` after `timeout`.
    pub fn stale_unready(&self, timeout: Duration, now: Instant) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|entry| {
                entry.state == ClientState::Created
                    && entry.process.is_some()
                    && now.saturating_duration_since(entry.created_at) >= timeout
            })
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// The registered primary, if any.
    pub fn primary(&self) -> Option<&ClientId> {
        self.primary.as_ref()
    }

    /// Look up a client.
    pub fn get(&self, id: &ClientId) -> Option<&ClientEntry> {
        self.clients.get(id)
    }

    /// Whether a client is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Iterate all clients.
    pub fn iter(&self) -> impl Iterator<Item = &ClientEntry> {
        self.clients.values()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
