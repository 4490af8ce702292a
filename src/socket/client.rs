//! Client-side connector for the hub socket.
//!
//! Used by launched windows and workers written in Rust, by the `request`
//! subcommand, and by the integration tests. Wraps a [`UnixStream`] with the
//! frame codec and the `hello` handshake.
//!
//! ```text
//! HubConnection::connect ──hello──► hub
//!                        ◄─welcome─
//!                        ──ready──►   (flushes queued deliveries)
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use super::framing::{Envelope, Frame, FrameDecoder};
use crate::client::{ClientId, ClientRole};

/// An open connection to a running hub.
#[derive(Debug)]
pub struct HubConnection {
    stream: UnixStream,
    decoder: FrameDecoder,
    inbox: VecDeque<Envelope>,
    client_id: Option<ClientId>,
}

impl HubConnection {
    /// Connect to the hub socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("Failed to connect to hub at {}", path.display()))?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            inbox: VecDeque::new(),
            client_id: None,
        })
    }

    /// Identify this connection and wait for the `welcome` reply.
    ///
    /// Pass `client_id` when the hub launched this process and handed it an
    /// id; otherwise a fresh client of `role` is registered.
    pub async fn hello(&mut self, role: ClientRole, client_id: Option<&ClientId>) -> Result<ClientId> {
        let mut payload = json!({ "role": role });
        if let Some(id) = client_id {
            payload["clientId"] = json!(id);
        }
        self.send(&Envelope::new("hello", payload)).await?;

        let reply = self.recv_timeout(Duration::from_secs(5)).await?;
        match reply.kind.as_str() {
            "welcome" => {
                let id: ClientId = serde_json::from_value(reply.payload["clientId"].clone())
                    .context("welcome without clientId")?;
                self.client_id = Some(id.clone());
                Ok(id)
            }
            "error" => bail!("hello rejected: {}", reply.payload["message"]),
            other => bail!("expected welcome, got {other}"),
        }
    }

    /// Signal readiness to receive queued deliveries.
    pub async fn ready(&mut self) -> Result<()> {
        self.send(&Envelope::bare("ready")).await
    }

    /// Client id assigned by the hub, once `hello` succeeded.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Send a request.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        self.stream
            .write_all(&frame)
            .await
            .context("Failed to write to hub socket")
    }

    /// Send a request built from a type name and payload.
    pub async fn request(&mut self, kind: &str, payload: Value) -> Result<()> {
        self.send(&Envelope::new(kind, payload)).await
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the hub closes the connection.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            if let Some(envelope) = self.inbox.pop_front() {
                return Ok(Some(envelope));
            }

            let n = self.stream.read(&mut buf).await.context("Failed to read from hub socket")?;
            if n == 0 {
                return Ok(None);
            }
            for Frame::Json(value) in self.decoder.feed(&buf[..n])? {
                self.inbox.push_back(Envelope::from_value(value)?);
            }
        }
    }

    /// Receive the next message, failing after `timeout` or on close.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Envelope> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(envelope))) => Ok(envelope),
            Ok(Ok(None)) => bail!("hub closed the connection"),
            Ok(Err(e)) => Err(e),
            Err(_) => bail!("timed out after {timeout:?} waiting for hub"),
        }
    }

    /// Receive messages until one of type `kind` arrives.
    ///
    /// Earlier messages of other types are discarded.
    pub async fn recv_kind(&mut self, kind: &str, timeout: Duration) -> Result<Envelope> {
        tokio::time::timeout(timeout, async {
            loop {
                match self.recv().await? {
                    Some(envelope) if envelope.kind == kind => return Ok(envelope),
                    Some(other) => log::debug!("[Socket] Skipping {} while waiting for {kind}", other.kind),
                    None => bail!("hub closed the connection while waiting for {kind}"),
                }
            }
        })
        .await
        .with_context(|| format!("timed out waiting for {kind}"))?
    }

    /// Check that nothing arrives within `window`.
    ///
    /// Returns the unexpected message if one does.
    pub async fn expect_silence(&mut self, window: Duration) -> Option<Envelope> {
        match tokio::time::timeout(window, self.recv()).await {
            Ok(Ok(envelope)) => envelope,
            _ => None,
        }
    }
}
