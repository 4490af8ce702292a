//! Per-connection state for socket clients (hub side).
//!
//! Each accepted socket connection gets a [`ClientConn`] that owns the read
//! and write tasks and translates between frames and [`HubEvent`]s.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::framing::{Envelope, Frame, FrameDecoder};
use crate::hub::events::{ConnId, HubEvent};

/// Hub-side handle for a single client connection.
///
/// Outbound messages are queued on an unbounded channel and written by a
/// dedicated task, so sending never blocks the hub loop.
pub struct ClientConn {
    /// Unique identifier for this connection.
    conn_id: ConnId,
    /// Sender for outgoing encoded frames.
    frame_tx: UnboundedSender<Vec<u8>>,
    /// Handle to the read task (for cleanup).
    read_handle: Option<JoinHandle<()>>,
    /// Handle to the write task (for cleanup).
    write_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

impl ClientConn {
    /// Create a connection handler for an accepted socket.
    ///
    /// Spawns read and write tasks:
    /// - Read task: decodes frames from socket → sends `HubEvent::ClientMessage`
    /// - Write task: receives encoded frames → writes to socket
    pub(crate) fn new(
        conn_id: ConnId,
        stream: UnixStream,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let read_handle = tokio::spawn(Self::read_loop(conn_id.clone(), read_half, hub_event_tx));
        let write_handle = tokio::spawn(Self::write_loop(conn_id.clone(), write_half, frame_rx));

        Self {
            conn_id,
            frame_tx,
            read_handle: Some(read_handle),
            write_handle: Some(write_handle),
        }
    }

    /// Create a connection backed only by a channel.
    ///
    /// The receiver yields exactly the encoded frames a socket peer would
    /// read. Used for in-process clients and tests.
    pub fn detached(conn_id: impl Into<ConnId>) -> (Self, UnboundedReceiver<Vec<u8>>) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let conn = Self {
            conn_id: conn_id.into(),
            frame_tx,
            read_handle: None,
            write_handle: None,
        };
        (conn, frame_rx)
    }

    /// Send an envelope to this client.
    ///
    /// Returns `false` if the write channel is closed (client disconnected)
    /// or the envelope is too large to frame.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(frame) => self.send_raw(frame),
            Err(e) => {
                log::error!("[Socket] Not sending {} to {}: {e}", envelope.kind, self.conn_id);
                false
            }
        }
    }

    /// Send pre-encoded frame bytes to this client.
    ///
    /// Broadcasts encode once and hand the same bytes to every recipient.
    pub fn send_raw(&self, encoded: Vec<u8>) -> bool {
        self.frame_tx.send(encoded).is_ok()
    }

    /// Connection identifier.
    pub fn conn_id(&self) -> &ConnId {
        &self.conn_id
    }

    /// Disconnect this client, aborting read/write tasks.
    pub fn disconnect(self) {
        if let Some(handle) = self.read_handle {
            handle.abort();
        }
        if let Some(handle) = self.write_handle {
            handle.abort();
        }
    }

    /// Decode frames from the socket into `HubEvent`s.
    async fn read_loop(
        conn_id: ConnId,
        mut reader: tokio::net::unix::OwnedReadHalf,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 64 * 1024];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    log::info!("[Socket] Client disconnected: {}", conn_id);
                    break;
                }
                Ok(n) => match decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for Frame::Json(msg) in frames {
                            let event = HubEvent::ClientMessage {
                                conn_id: conn_id.clone(),
                                msg,
                            };
                            if hub_event_tx.send(event).is_err() {
                                return; // Hub loop has exited
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("[Socket] Frame decode error for {}: {e}", conn_id);
                        break;
                    }
                },
                Err(e) => {
                    log::error!("[Socket] Read error for {}: {e}", conn_id);
                    break;
                }
            }
        }

        let _ = hub_event_tx.send(HubEvent::ClientDisconnected { conn_id });
    }

    /// Write queued frames to the socket.
    async fn write_loop(
        conn_id: ConnId,
        mut writer: tokio::net::unix::OwnedWriteHalf,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Socket] Write error for {}: {e}", conn_id);
                break;
            }
        }
    }
}
