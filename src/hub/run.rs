//! Hub event loop.
//!
//! A single task owns the [`Hub`] and consumes the event channel. Producers
//! (accept loop, connection read tasks) never touch hub state; they only
//! send [`HubEvent`]s. A periodic tick drives ready-timeout cleanup.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::MissedTickBehavior;

use super::{Hub, HubEvent};
use crate::error::HubError;
use crate::socket::server::SocketServer;

/// How often unready launched clients are checked.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Run the event loop until shutdown, primary closure or a fatal error.
///
/// Every client is closed before returning.
///
/// # Errors
///
/// Returns the fatal [`HubError`] that stopped the loop.
pub async fn run(
    hub: &mut Hub,
    events: &mut UnboundedReceiver<HubEvent>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), HubError> {
    tokio::pin!(shutdown);
    let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!("[Hub] Event loop starting");

    let result = loop {
        if hub.should_quit() {
            break Ok(());
        }

        let event = tokio::select! {
            () = &mut shutdown => {
                log::info!("[Hub] Shutdown signal received");
                break Ok(());
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    log::info!("[Hub] Event channel closed");
                    break Ok(());
                }
            },
            _ = cleanup.tick() => HubEvent::CleanupTick,
        };

        if let Err(e) = hub.handle_event(event) {
            log::error!("[Hub] Fatal: {e}");
            break Err(e);
        }
    };

    hub.shutdown();
    log::info!("[Hub] Event loop exiting");
    result
}

/// Listen on `socket_path` and run `hub` until it stops.
///
/// Launches the primary window first when the hub is configured to.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound, the primary cannot be
/// launched, or the loop stops on a fatal error.
pub async fn serve(
    mut hub: Hub,
    socket_path: PathBuf,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let server = SocketServer::start(socket_path, event_tx)?;

    if hub.settings.launch_primary {
        if let Err(e) = hub.launch_primary() {
            server.shutdown();
            return Err(e.into());
        }
    }

    let result = run(&mut hub, &mut event_rx, shutdown).await;
    server.shutdown();
    result.map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRole;
    use crate::hub::testing::TestHub;
    use crate::session::LengthPolicy;
    use crate::socket::client_conn::ClientConn;
    use serde_json::json;

    #[tokio::test]
    async fn test_loop_stops_on_shutdown_event() {
        let mut hub = TestHub::new(LengthPolicy::Strict).hub;
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(HubEvent::Shutdown).unwrap();

        run(&mut hub, &mut rx, std::future::pending()).await.unwrap();
        assert!(hub.should_quit());
    }

    #[tokio::test]
    async fn test_loop_returns_fatal_error() {
        let mut hub = TestHub::new(LengthPolicy::Strict).hub;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut receivers = Vec::new();
        for conn_id in ["conn:a", "conn:b"] {
            let (conn, rx_conn) = ClientConn::detached(conn_id);
            receivers.push(rx_conn);
            tx.send(HubEvent::ClientConnected {
                conn_id: conn_id.to_string(),
                conn,
            })
            .unwrap();
            tx.send(HubEvent::ClientMessage {
                conn_id: conn_id.to_string(),
                msg: json!({"type": "hello", "payload": {"role": ClientRole::Primary}}),
            })
            .unwrap();
        }

        let result = run(&mut hub, &mut rx, std::future::pending()).await;

        assert!(matches!(result, Err(HubError::DoublePrimary { .. })));
        assert!(hub.clients().is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown_future() {
        let mut hub = TestHub::new(LengthPolicy::Strict).hub;
        let (_tx, mut rx) = mpsc::unbounded_channel();

        run(&mut hub, &mut rx, async {}).await.unwrap();
    }
}
