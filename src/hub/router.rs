//! Broadcast routing.
//!
//! Fan-out is fire-and-forget: each recipient has its own outbound queue, a
//! send to a client whose connection has gone away is dropped, and nothing is
//! retried. Because the hub loop calls these functions synchronously inside
//! the handler, every broadcast for one mutation is queued before the next
//! request is looked at.

use serde_json::Value;

use crate::client::{ClientId, ClientRegistry, ClientState};
use crate::error::HubError;
use crate::socket::framing::{Envelope, MAX_FRAME_SIZE};

/// Send `kind`/`payload` to every connected client, optionally skipping the
/// originator. Returns the number of clients the message was queued for.
///
/// A payload too large to frame reaches nobody.
pub fn broadcast(
    registry: &ClientRegistry,
    kind: &str,
    payload: &Value,
    except: Option<&ClientId>,
) -> usize {
    let frame = match Envelope::new(kind, payload.clone()).encode() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("[Hub] Broadcast {} refused: {e}", kind);
            return 0;
        }
    };

    let mut delivered = 0;
    for entry in registry.iter() {
        if Some(entry.id()) == except || entry.state() == ClientState::Closed {
            continue;
        }
        let Some(conn) = entry.conn() else {
            continue;
        };
        if conn.send_raw(frame.clone()) {
            delivered += 1;
        } else {
            log::debug!("[Hub] Dropped {} for vanished client {}", kind, entry.id());
        }
    }

    log::debug!("[Hub] Broadcast {} to {} client(s)", kind, delivered);
    delivered
}

/// Send one message to one client.
///
/// # Errors
///
/// Returns [`HubError::TooLarge`] if the envelope cannot be framed, and
/// [`HubError::ClientVanished`] if the client is unknown, has no connection,
/// or its connection is closed.
pub fn send_to(registry: &ClientRegistry, id: &ClientId, envelope: &Envelope) -> Result<(), HubError> {
    let frame = envelope.encode().map_err(|e| HubError::TooLarge {
        what: envelope.kind.clone(),
        size: e.size,
        limit: MAX_FRAME_SIZE as usize,
    })?;
    let sent = registry
        .get(id)
        .and_then(|entry| entry.conn())
        .is_some_and(|conn| conn.send_raw(frame));
    if sent {
        Ok(())
    } else {
        Err(HubError::ClientVanished(id.clone()))
    }
}
