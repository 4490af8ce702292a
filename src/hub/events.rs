//! Unified event channel for the hub event loop.
//!
//! Every producer (the socket accept loop, per-connection read tasks, the
//! cleanup timer, the shutdown signal) sends through a single
//! `mpsc::UnboundedSender<HubEvent>`. The hub's `select!` loop is the only
//! consumer, so events are handled strictly one at a time.

use serde_json::Value;

use crate::socket::client_conn::ClientConn;

/// Identifier of one socket connection, assigned at accept time.
///
/// Distinct from [`ClientId`](crate::client::ClientId): a connection is
/// bound to a client only after its `hello`.
pub type ConnId = String;

/// Event delivered to the hub event loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A socket connection was accepted.
    ///
    /// The connection is held unbound until it sends `hello`.
    ClientConnected {
        /// Connection identifier.
        conn_id: ConnId,
        /// Connection handle.
        conn: ClientConn,
    },

    /// A JSON frame arrived on a connection.
    ClientMessage {
        /// Connection the frame arrived on.
        conn_id: ConnId,
        /// Raw envelope.
        msg: Value,
    },

    /// A connection closed (EOF, read error or decode error).
    ClientDisconnected {
        /// Connection identifier.
        conn_id: ConnId,
    },

    /// Periodic housekeeping: close spawned clients that never became ready.
    CleanupTick,

    /// Stop the hub.
    Shutdown,
}
