//! Client lifecycle: spawning, readiness, teardown cascades.
//!
//! Spawned clients are pre-registered before their process starts, so the
//! hub knows their id, role and pending delivery up front. The delivery waits
//! in the registry until the client sends `ready`; nothing blocks the loop in
//! the meantime.
//!
//! Closing a client forgets its connection mapping at the same time, so any
//! frames it already had in flight are dropped on arrival.

use std::path::Path;
use std::time::Instant;

use serde_json::Value;

use super::{ConnId, Hub};
use crate::client::{ClientId, ClientRole, PendingDelivery, WorkerTask};
use crate::error::HubError;
use crate::launcher::LaunchRequest;
use crate::socket::framing::Envelope;

const PARSER_TITLE: &str = "File Parser";
const MST_TITLE: &str = "MST Computer";
const CSV_PARSER_ENTRY: &str = "workers/parse-link-csv.html";
const FASTA_PARSER_ENTRY: &str = "workers/parse-fasta.html";
const MST_ENTRY: &str = "workers/compute-mst.html";

impl Hub {
    /// Mark `id` ready and hand over whatever was queued for it.
    pub(super) fn client_ready(&mut self, id: &ClientId) -> Result<(), HubError> {
        let deliveries = self.clients.mark_ready(id)?;
        log::debug!("[Hub] {} ready, {} queued delivery(ies)", id, deliveries.len());

        for delivery in deliveries {
            let envelope = match delivery {
                PendingDelivery::Message(envelope) => envelope,
                PendingDelivery::SessionData => Envelope::new("set-data", self.store.data_json()),
            };
            self.reply(id, envelope);
        }
        Ok(())
    }

    /// Start a parsing worker; it receives `instructions` once ready.
    pub(super) fn spawn_parser(&mut self, instructions: Value) -> Result<ClientId, HubError> {
        let entry = parser_entry(&instructions);
        if let Some(file) = instructions.get("file") {
            self.store.record_file(file.clone());
        }
        self.spawn_worker(
            WorkerTask::ParseFiles,
            PARSER_TITLE,
            entry,
            PendingDelivery::Message(Envelope::new("deliver-instructions", instructions)),
        )
    }

    /// Start an MST worker; it receives the dataset as of its readiness.
    pub(super) fn spawn_mst(&mut self) -> Result<ClientId, HubError> {
        self.spawn_worker(
            WorkerTask::ComputeMst,
            MST_TITLE,
            MST_ENTRY,
            PendingDelivery::SessionData,
        )
    }

    fn spawn_worker(
        &mut self,
        task: WorkerTask,
        title: &str,
        entry: &str,
        delivery: PendingDelivery,
    ) -> Result<ClientId, HubError> {
        let id = self.clients.register_worker(task);
        self.clients.queue_on_ready(&id, delivery);
        self.launch(LaunchRequest::worker(id.clone(), title, entry))?;
        Ok(id)
    }

    /// Open a satellite view.
    pub(super) fn launch_view(&mut self, view_id: &str) -> Result<ClientId, HubError> {
        let id = self.clients.register(ClientRole::Satellite)?;
        self.launch(LaunchRequest::satellite(id.clone(), view_id))?;
        Ok(id)
    }

    /// Register and launch the primary window.
    ///
    /// # Errors
    ///
    /// Fails with [`HubError::DoublePrimary`] if a primary already exists, or
    /// [`HubError::Launch`] if the process cannot be started.
    pub fn launch_primary(&mut self) -> Result<ClientId, HubError> {
        let id = self.clients.register(ClientRole::Primary)?;
        let request = LaunchRequest::primary(id.clone(), self.settings.primary_entry.clone());
        self.launch(request)?;
        Ok(id)
    }

    fn launch(&mut self, request: LaunchRequest) -> Result<(), HubError> {
        match self.launcher.launch(&request) {
            Ok(Some(process)) => {
                self.clients.set_process(&request.client_id, process);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.close_client(&request.client_id);
                Err(HubError::Launch(format!("{e:#}")))
            }
        }
    }

    /// Close every parsing worker.
    pub(super) fn cancel_parsing(&mut self) {
        let closed = self.clients.cancel_parsing();
        self.forget_connections(&closed);
        log::info!("[Hub] Parsing cancelled");
    }

    /// Close everything but the primary and start a fresh session.
    pub(super) fn reset(&mut self) {
        let keep = self.clients.primary().cloned();
        let closed = self.clients.close_all_except(keep.as_ref());
        self.forget_connections(&closed);

        let session = self.store.reset();
        log::info!(
            "[Hub] Reset to session {} (generation {}), {} client(s) remain",
            session.id,
            session.generation,
            self.clients.len()
        );
    }

    /// Close and purge one client.
    ///
    /// Closing the primary, for whatever reason, stops the hub.
    pub(super) fn close_client(&mut self, id: &ClientId) {
        let was_primary = self.clients.primary() == Some(id);
        if let Some(Some(conn_id)) = self.clients.unregister(id) {
            self.bound.remove(&conn_id);
        }
        if was_primary {
            log::info!("[Hub] Primary client {} closed, shutting down", id);
            self.quit = true;
        }
    }

    /// A connection went away.
    ///
    /// The bound client is closed; if it was the primary the hub stops.
    pub(super) fn handle_disconnect(&mut self, conn_id: &ConnId) {
        if self.unbound.remove(conn_id).is_some() {
            log::debug!("[Hub] Unidentified connection {} closed", conn_id);
            return;
        }
        let Some(id) = self.bound.get(conn_id).cloned() else {
            return;
        };
        let current = self.clients.get(&id).and_then(|entry| entry.conn_id().cloned());
        if current.as_ref() != Some(conn_id) {
            self.bound.remove(conn_id);
            return;
        }
        self.close_client(&id);
    }

    /// Close launched clients that never became ready.
    pub(super) fn close_stale_clients(&mut self, now: Instant) {
        for id in self.clients.stale_unready(self.settings.ready_timeout, now) {
            let (pid, undelivered) = self
                .clients
                .get(&id)
                .map_or((None, 0), |entry| (entry.pid(), entry.pending().len()));
            log::warn!(
                "[Hub] {} (pid {:?}) not ready after {:?}, closing with {} undelivered",
                id,
                pid,
                self.settings.ready_timeout,
                undelivered
            );
            self.close_client(&id);
        }
    }

    /// Close every client and connection.
    pub fn shutdown(&mut self) {
        let closed = self.clients.close_all_except(None);
        self.forget_connections(&closed);
        for (_, conn) in self.unbound.drain() {
            conn.disconnect();
        }
        self.bound.clear();
    }

    fn forget_connections(&mut self, conn_ids: &[ConnId]) {
        for conn_id in conn_ids {
            self.bound.remove(conn_id);
        }
    }
}

/// Pick the parser worker for the file named in `instructions`.
fn parser_entry(instructions: &Value) -> &'static str {
    let file = &instructions["file"];
    let name = file
        .as_str()
        .or_else(|| file["name"].as_str())
        .or_else(|| file["path"].as_str())
        .unwrap_or_default();

    let is_csv = Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        CSV_PARSER_ENTRY
    } else {
        FASTA_PARSER_ENTRY
    }
}
