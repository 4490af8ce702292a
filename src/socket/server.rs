//! Unix domain socket server for accepting client connections.
//!
//! Listens on a Unix socket and creates a [`ClientConn`] for each accepted
//! connection. Each connection is announced to the hub via
//! `HubEvent::ClientConnected`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::client_conn::ClientConn;
use crate::hub::events::{ConnId, HubEvent};

/// `sun_path` is 104 bytes on macOS and 108 on Linux.
const MAX_SOCKET_PATH: usize = 104;

/// Unix domain socket server for hub IPC.
#[derive(Debug)]
pub struct SocketServer {
    socket_path: PathBuf,
    accept_handle: JoinHandle<()>,
}

impl SocketServer {
    /// Start the socket server at the given path.
    ///
    /// Removes any stale socket file, binds the listener, sets permissions
    /// to 0600, and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is too long or the socket cannot be bound.
    pub fn start(socket_path: PathBuf, hub_event_tx: UnboundedSender<HubEvent>) -> Result<Self> {
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({path_len} bytes, max {}): {}\n\
                 Consider setting GRAPHHUB_SOCKET to a shorter path.",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)?;
        }

        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        log::info!("[Socket] Listening on {}", socket_path.display());

        let accept_handle = tokio::spawn(Self::accept_loop(
            listener,
            hub_event_tx,
            socket_path.clone(),
        ));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    async fn accept_loop(
        listener: UnixListener,
        hub_event_tx: UnboundedSender<HubEvent>,
        socket_path: PathBuf,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let conn_id = generate_conn_id();
                    log::info!("[Socket] Connection accepted: {}", conn_id);

                    let conn = ClientConn::new(conn_id.clone(), stream, hub_event_tx.clone());

                    if hub_event_tx
                        .send(HubEvent::ClientConnected { conn_id, conn })
                        .is_err()
                    {
                        log::warn!("[Socket] Hub event channel closed, stopping accept loop");
                        break;
                    }
                }
                Err(e) => {
                    if !socket_path.exists() {
                        log::info!("[Socket] Socket file removed, stopping accept loop");
                        break;
                    }
                    log::error!("[Socket] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Stop accepting and remove the socket file.
    pub fn shutdown(self) {
        self.accept_handle.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }

    /// Path to the socket file.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Generate a unique connection ID.
fn generate_conn_id() -> ConnId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn:{seq}")
}
