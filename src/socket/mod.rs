//! Unix domain socket transport between the hub and its clients.
//!
//! # Architecture
//!
//! ```text
//! Hub Process                          Window / worker process
//! ┌──────────────────┐                ┌──────────────────┐
//! │ SocketServer     │                │ HubConnection    │
//! │  UnixListener    │◄──────────────►│  UnixStream      │
//! │  ClientConn      │  frames over   │  hello / ready   │
//! │  per connection  │  Unix socket   │                  │
//! └────────┬─────────┘                └──────────────────┘
//!          │ HubEvent
//!          ▼
//!       Hub event loop
//! ```
//!
//! # Wire Protocol
//!
//! Length-prefixed frames: `[u32 LE length][u8 type][payload]`
//!
//! See [`framing`] for frame types and codec.

pub mod client;
pub mod client_conn;
pub mod framing;
pub mod server;
