//! Graphhub - session-state hub for multi-window graph visualization.
//!
//! One long-lived process holds the authoritative dataset (nodes, links,
//! clusters, distance matrix) and keeps any number of presentation windows
//! and disposable worker processes in sync with it over a Unix socket.
//!
//! # Architecture
//!
//! - **Session** - the dataset plus shared UI state, mutated only by the hub
//! - **Client** - a registered window or worker and its lifecycle
//! - **Hub** - single-consumer event loop: decode, apply, broadcast
//! - **Socket** - length-prefixed JSON frames between hub and clients
//!
//! # Modules
//!
//! - [`session`] - data model, store and positional update validation
//! - [`client`] - client ids, roles and the registry
//! - [`hub`] - event loop, request handlers and broadcast routing
//! - [`socket`] - wire codec, server and client connector
//! - [`assets`] - memoized manifest and component reads
//! - [`launcher`] - window and worker process spawning
//! - [`config`] - configuration loading/saving

pub mod assets;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod hub;
pub mod launcher;
pub mod session;
pub mod socket;

pub use config::Config;
pub use error::HubError;
pub use hub::{Hub, HubSettings};
pub use session::{Session, SessionStore};
