//! Request handlers.
//!
//! One arm per [`HubRequest`]. Handlers compose the store, the registry, the
//! asset cache and the router; none of them awaits, so a request and the
//! broadcast it causes complete before the loop takes the next event.
//!
//! | Request | Effect | Sent |
//! |---|---|---|
//! | `get-data` | read | `set-data` to requester |
//! | `set-data` | merge top-level keys | `set-data` to all but requester |
//! | `update-node-*` / `update-link-*` | positional write | same name to all but requester |
//! | `update-clusters` | replace clusters | `update-clusters` to all |
//! | `update-state` | merge UI state | `update-state` to all but requester |
//! | `parse-files`, `compute-mst`, `launch-view` | spawn client | queued until `ready` |
//! | `cancel-parsing`, `reset` | close clients | none |
//! | `get-manifest`, `get-component` | memoized read | `deliver-*` to requester |
//! | `log` | hub log | none |
//! | `tick`, `message` | forward | to primary |

use serde_json::{json, Value};

use super::requests::HubRequest;
use super::router;
use super::{ConnId, Hub};
use crate::client::{ClientId, ClientRole};
use crate::error::HubError;
use crate::session::PositionalUpdate;
use crate::socket::framing::Envelope;

impl Hub {
    /// Route one inbound frame from `conn_id`.
    pub(super) fn handle_message(&mut self, conn_id: &ConnId, msg: Value) -> Result<(), HubError> {
        let envelope = match Envelope::from_value(msg) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = HubError::MalformedRequest(e.to_string());
                self.reply_error_to_conn(conn_id, "", &err);
                return Ok(());
            }
        };

        if let Some(client_id) = self.bound.get(conn_id).cloned() {
            if !self.clients.contains(&client_id) {
                log::debug!("[Hub] Dropping {} from purged client {}", envelope.kind, client_id);
                return Ok(());
            }
            let result = HubRequest::decode(&envelope)
                .and_then(|request| self.dispatch(&client_id, request));
            return self.settle(result, &envelope.kind, |hub, err| {
                hub.reply_error(&client_id, &envelope.kind, err);
            });
        }

        if self.unbound.contains_key(conn_id) {
            let result = match HubRequest::decode(&envelope) {
                Ok(HubRequest::Hello { role, client_id }) => self.handle_hello(conn_id, role, client_id),
                Ok(_) => Err(HubError::HelloRequired),
                Err(e) => Err(e),
            };
            return self.settle(result, &envelope.kind, |hub, err| {
                hub.reply_error_to_conn(conn_id, &envelope.kind, err);
            });
        }

        log::debug!("[Hub] Dropping {} from closed connection {}", envelope.kind, conn_id);
        Ok(())
    }

    /// Fatal errors propagate; anything else is logged and answered.
    fn settle(
        &mut self,
        result: Result<(), HubError>,
        request: &str,
        reply: impl FnOnce(&mut Self, &HubError),
    ) -> Result<(), HubError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                log::warn!("[Hub] {} failed: {}", request, err);
                reply(self, &err);
                Ok(())
            }
        }
    }

    fn handle_hello(
        &mut self,
        conn_id: &ConnId,
        role: ClientRole,
        client_id: Option<ClientId>,
    ) -> Result<(), HubError> {
        let id = match client_id {
            Some(id) => {
                if !self.clients.contains(&id) {
                    return Err(HubError::UnknownClient(id.to_string()));
                }
                id
            }
            None => self.clients.register(role)?,
        };

        let Some(conn) = self.unbound.remove(conn_id) else {
            return Ok(());
        };
        if let Some(previous) = self.clients.get(&id).and_then(|e| e.conn_id().cloned()) {
            self.bound.remove(&previous);
        }
        self.clients.attach(&id, conn)?;
        self.bound.insert(conn_id.clone(), id.clone());

        let role = self.clients.get(&id).map_or(role, |entry| entry.role());
        log::info!("[Hub] {} identified as {} ({})", conn_id, id, role);
        self.reply(&id, Envelope::new("welcome", json!({ "clientId": id, "role": role })));
        Ok(())
    }

    /// Apply one request from a bound client.
    pub(super) fn dispatch(&mut self, sender: &ClientId, request: HubRequest) -> Result<(), HubError> {
        match request {
            HubRequest::Hello { .. } => Err(HubError::MalformedRequest(
                "connection already identified".to_string(),
            )),
            HubRequest::Ready => self.client_ready(sender),
            HubRequest::GetData => self.respond(sender, Envelope::new("set-data", self.store.data_json())),
            HubRequest::SetData(patch) => {
                self.store.replace_data(patch)?;
                router::broadcast(&self.clients, "set-data", &self.store.data_json(), Some(sender));
                Ok(())
            }
            HubRequest::Positional(update) => self.apply_positional(sender, &update),
            HubRequest::UpdateClusters(clusters) => {
                self.store.replace_clusters(clusters.clone())?;
                router::broadcast(&self.clients, "update-clusters", &clusters, None);
                Ok(())
            }
            HubRequest::UpdateState(patch) => {
                self.store.update_state(patch);
                let state = serde_json::to_value(&self.store.session().state).unwrap_or(Value::Null);
                router::broadcast(&self.clients, "update-state", &state, Some(sender));
                Ok(())
            }
            HubRequest::ParseFiles(instructions) => self.spawn_parser(instructions).map(drop),
            HubRequest::CancelParsing => {
                self.cancel_parsing();
                Ok(())
            }
            HubRequest::ComputeMst => self.spawn_mst().map(drop),
            HubRequest::LaunchView(view_id) => self.launch_view(&view_id).map(drop),
            HubRequest::Reset => {
                self.reset();
                Ok(())
            }
            HubRequest::GetManifest => {
                let manifest = self.assets.manifest()?;
                self.respond(sender, Envelope::new("deliver-manifest", manifest))
            }
            HubRequest::GetComponent(name) => {
                let contents = self.assets.component(&name)?;
                self.respond(
                    sender,
                    Envelope::new("deliver-component", json!({ "name": name, "contents": contents })),
                )
            }
            HubRequest::Log(line) => {
                log::info!("[Client {}] {}", sender, text_of(&line));
                Ok(())
            }
            HubRequest::Tick(payload) => {
                self.forward_to_primary("tick", payload);
                Ok(())
            }
            HubRequest::Message(payload) => {
                self.store.push_message(text_of(&payload));
                self.forward_to_primary("message", payload);
                Ok(())
            }
        }
    }

    fn apply_positional(&mut self, sender: &ClientId, update: &PositionalUpdate) -> Result<(), HubError> {
        let applied = self.store.apply_positional(update)?;
        if let Some(problem) = &applied.tolerated {
            log::warn!(
                "[Hub] {}; applied {} of {} entries",
                problem,
                applied.written,
                update.len()
            );
        }
        router::broadcast(
            &self.clients,
            update.kind.message_type(),
            &update.values_json(),
            Some(sender),
        );
        Ok(())
    }

    fn forward_to_primary(&self, kind: &str, payload: Value) {
        match self.clients.primary() {
            Some(primary) => self.reply(primary, Envelope::new(kind, payload)),
            None => log::debug!("[Hub] No primary to forward {} to", kind),
        }
    }

    /// Answer a request from `id`.
    ///
    /// A vanished recipient is not an error; an answer too large to frame is
    /// returned so the requester gets an `error` instead.
    fn respond(&self, id: &ClientId, envelope: Envelope) -> Result<(), HubError> {
        match router::send_to(&self.clients, id, &envelope) {
            Err(err @ HubError::TooLarge { .. }) => Err(err),
            Err(e) => {
                log::debug!("[Hub] Reply {} dropped: {}", envelope.kind, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Send to one client; a vanished recipient is not an error.
    ///
    /// A message too large to frame is replaced by an `error` naming it.
    pub(super) fn reply(&self, id: &ClientId, envelope: Envelope) {
        match router::send_to(&self.clients, id, &envelope) {
            Ok(()) => {}
            Err(err @ HubError::TooLarge { .. }) => {
                log::error!("[Hub] {} for {} not sent: {}", envelope.kind, id, err);
                let _ = router::send_to(&self.clients, id, &error_envelope(&envelope.kind, &err));
            }
            Err(e) => log::debug!("[Hub] Reply {} dropped: {}", envelope.kind, e),
        }
    }

    fn reply_error(&self, id: &ClientId, request: &str, err: &HubError) {
        self.reply(id, error_envelope(request, err));
    }

    fn reply_error_to_conn(&self, conn_id: &ConnId, request: &str, err: &HubError) {
        let envelope = error_envelope(request, err);
        if let Some(conn) = self.unbound.get(conn_id) {
            conn.send(&envelope);
        } else if let Some(id) = self.bound.get(conn_id) {
            self.reply(id, envelope);
        }
    }
}

fn error_envelope(request: &str, err: &HubError) -> Envelope {
    Envelope::new(
        "error",
        json!({
            "request": request,
            "kind": err.kind(),
            "message": err.to_string(),
        }),
    )
}

/// Strings are logged bare, anything else as JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
