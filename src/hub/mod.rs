//! Hub - owner of the session and coordinator of every client.
//!
//! The hub holds the only copy of the session, the client registry and the
//! asset cache. It runs a single-consumer event loop: every socket frame,
//! connect, disconnect and timer tick arrives as a [`HubEvent`] and is handled
//! to completion (including any broadcast it causes) before the next one is
//! taken off the channel. No locks are involved.
//!
//! # Architecture
//!
//! ```text
//!   SocketServer ──ClientConnected──┐
//!   ClientConn   ──ClientMessage────┤
//!   ClientConn   ──ClientDisconnected┤──► Hub::handle_event
//!   interval     ──CleanupTick──────┘        │
//!                                           ├── SessionStore
//!                                           ├── ClientRegistry ── Launcher
//!                                           ├── AssetCache
//!                                           └── router::broadcast
//! ```
//!
//! # Module Structure
//!
//! - `events.rs` - [`HubEvent`] and [`ConnId`]
//! - `requests.rs` - wire envelope to [`HubRequest`]
//! - `handlers.rs` - per-request behavior
//! - `lifecycle.rs` - spawn, close, cancel and reset cascades
//! - `router.rs` - broadcast fan-out
//! - `run.rs` - the `select!` loop and socket wiring
//! - `daemon.rs` - PID and socket files

pub mod daemon;
pub mod events;
mod handlers;
mod lifecycle;
pub mod requests;
pub mod router;
mod run;
#[cfg(test)]
mod testing;

pub use events::{ConnId, HubEvent};
pub use requests::HubRequest;
pub use run::{run, serve};

use std::collections::HashMap;
use std::time::Duration;

use crate::assets::{AssetCache, FsAssets};
use crate::client::{ClientId, ClientRegistry};
use crate::config::Config;
use crate::launcher::{CommandLauncher, Launcher, NullLauncher};
use crate::session::SessionStore;
use crate::socket::client_conn::ClientConn;

/// Hub behavior that is not part of the session itself.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Entry point for the primary window.
    pub primary_entry: String,
    /// Launch the primary window at startup.
    pub launch_primary: bool,
    /// How long a launched client may stay `Created`.
    pub ready_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            primary_entry: "index.html".to_string(),
            launch_primary: false,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Central coordinator.
#[derive(Debug)]
pub struct Hub {
    store: SessionStore,
    clients: ClientRegistry,
    assets: AssetCache,
    launcher: Box<dyn Launcher>,
    settings: HubSettings,
    /// Connections that have not sent `hello` yet.
    unbound: HashMap<ConnId, ClientConn>,
    /// Connections bound to a registered client.
    bound: HashMap<ConnId, ClientId>,
    quit: bool,
}

impl Hub {
    /// Assemble a hub from its parts.
    pub fn new(
        store: SessionStore,
        assets: AssetCache,
        launcher: Box<dyn Launcher>,
        settings: HubSettings,
    ) -> Self {
        Self {
            store,
            clients: ClientRegistry::new(),
            assets,
            launcher,
            settings,
            unbound: HashMap::new(),
            bound: HashMap::new(),
            quit: false,
        }
    }

    /// Build a hub from configuration.
    ///
    /// Launched processes are told to connect to `socket_path`.
    pub fn from_config(config: &Config, socket_path: &std::path::Path) -> Self {
        let assets = AssetCache::new(
            Box::new(FsAssets::new(config.asset_root.clone())),
            config.manifest_file.clone(),
            config.components_dir.clone(),
        );

        let launcher: Box<dyn Launcher> = match config
            .launch_command
            .as_deref()
            .and_then(|cmd| CommandLauncher::from_command_line(cmd, socket_path.to_path_buf()))
        {
            Some(launcher) => match Config::config_dir() {
                Ok(root) => Box::new(launcher.with_data_root(&root)),
                Err(e) => {
                    log::warn!("[Hub] No data directory for launched windows: {e:#}");
                    Box::new(launcher)
                }
            },
            None => Box::new(NullLauncher),
        };

        let settings = HubSettings {
            primary_entry: config.primary_entry.clone(),
            launch_primary: config.launch_primary,
            ready_timeout: config.ready_timeout(),
        };

        Self::new(SessionStore::new(config.length_policy), assets, launcher, settings)
    }

    /// The session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The client registry.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Whether the hub has been asked to stop.
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Handle one event to completion.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned; everything else is answered with an
    /// `error` reply to the client concerned.
    pub fn handle_event(&mut self, event: HubEvent) -> Result<(), crate::error::HubError> {
        match event {
            HubEvent::ClientConnected { conn_id, conn } => {
                log::debug!("[Hub] Connection {} awaiting hello", conn_id);
                self.unbound.insert(conn_id, conn);
                Ok(())
            }
            HubEvent::ClientMessage { conn_id, msg } => self.handle_message(&conn_id, msg),
            HubEvent::ClientDisconnected { conn_id } => {
                self.handle_disconnect(&conn_id);
                Ok(())
            }
            HubEvent::CleanupTick => {
                self.close_stale_clients(std::time::Instant::now());
                Ok(())
            }
            HubEvent::Shutdown => {
                log::info!("[Hub] Shutdown requested");
                self.quit = true;
                Ok(())
            }
        }
    }
}
