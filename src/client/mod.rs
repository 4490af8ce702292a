//! Client identity and lifecycle types.
//!
//! A client is anything registered with the hub: the primary window, a
//! satellite view, or a disposable worker. Each one moves through
//! `Created → Ready → Closed`; `Closed` is terminal and the registry entry is
//! purged at that point.
//!
//! # Roles
//!
//! ```text
//! Primary   - exactly one; its closure ends the hub
//! Satellite - extra views launched with `launch-view`
//! Worker    - parse or MST workers; receive one delivery once Ready
//! ```

mod registry;

pub use registry::{ClientEntry, ClientRegistry, PendingDelivery};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for a registered client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing identifier (e.g. one echoed back in `hello`).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier for a client of the given role.
    ///
    /// Monotonic counter plus a random suffix, so ids are never reused
    /// within a run and are hard to guess from outside.
    pub fn generate(role: ClientRole) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let rand: u16 = rand::random();
        Self(format!("{role}:{seq:x}{rand:04x}"))
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a client is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// The main window.
    Primary,
    /// A disposable background worker.
    Worker,
    /// An additional presentation window.
    #[default]
    Satellite,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientRole::Primary => "primary",
            ClientRole::Worker => "worker",
            ClientRole::Satellite => "satellite",
        })
    }
}

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered; may not have installed its receive handlers yet.
    Created,
    /// Signalled readiness; queued deliveries have been flushed.
    Ready,
    /// Torn down. Nothing is delivered after this.
    Closed,
}

/// The one-shot job a worker was spawned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerTask {
    /// File parsing; cancellable with `cancel-parsing`.
    ParseFiles,
    /// Minimum spanning tree computation.
    ComputeMst,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_carry_role_and_are_unique() {
        let a = ClientId::generate(ClientRole::Worker);
        let b = ClientId::generate(ClientRole::Worker);

        assert!(a.as_str().starts_with("worker:"), "got {a}");
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        let role: ClientRole = serde_json::from_str("\"primary\"").unwrap();
        assert_eq!(role, ClientRole::Primary);
        assert_eq!(serde_json::to_string(&ClientRole::Satellite).unwrap(), "\"satellite\"");
        assert_eq!(ClientRole::default(), ClientRole::Satellite);
    }

    #[test]
    fn test_client_id_is_transparent_string() {
        let id = ClientId::new("satellite:1f");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("satellite:1f"));
    }
}
