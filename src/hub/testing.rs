//! In-process harness for hub unit tests.
//!
//! Drives a [`Hub`] directly through [`Hub::handle_event`] with detached
//! connections, so tests see exactly the frames a socket peer would.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{ConnId, Hub, HubEvent, HubSettings};
use crate::assets::{AssetCache, AssetSource};
use crate::client::{ClientId, ClientRole};
use crate::error::HubError;
use crate::launcher::{LaunchRequest, LaunchedProcess, Launcher};
use crate::session::{LengthPolicy, SessionStore};
use crate::socket::client_conn::ClientConn;
use crate::socket::framing::{Envelope, Frame, FrameDecoder};

#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryAssets {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    reads: Arc<AtomicUsize>,
}

impl AssetSource for MemoryAssets {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such asset"))
    }
}

/// Records launch requests instead of starting processes.
#[derive(Debug, Default, Clone)]
pub(crate) struct RecordingLauncher {
    pub(crate) launched: Arc<Mutex<Vec<LaunchRequest>>>,
    pub(crate) fail: bool,
}

impl Launcher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> anyhow::Result<Option<LaunchedProcess>> {
        if self.fail {
            anyhow::bail!("no display");
        }
        self.launched.lock().unwrap().push(request.clone());
        Ok(None)
    }
}

pub(crate) struct TestClient {
    pub(crate) conn_id: ConnId,
    pub(crate) id: Option<ClientId>,
    rx: UnboundedReceiver<Vec<u8>>,
    decoder: FrameDecoder,
    inbox: Vec<Envelope>,
}

impl TestClient {
    /// Next envelope the hub sent, if any.
    pub(crate) fn next(&mut self) -> Option<Envelope> {
        self.pump();
        if self.inbox.is_empty() {
            None
        } else {
            Some(self.inbox.remove(0))
        }
    }

    /// Everything the hub has sent so far.
    pub(crate) fn drain(&mut self) -> Vec<Envelope> {
        self.pump();
        std::mem::take(&mut self.inbox)
    }

    /// Whether the hub dropped this connection.
    pub(crate) fn is_closed(&mut self) -> bool {
        self.pump();
        matches!(
            self.rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        )
    }

    fn pump(&mut self) {
        while let Ok(bytes) = self.rx.try_recv() {
            for Frame::Json(value) in self.decoder.feed(&bytes).unwrap() {
                self.inbox.push(Envelope::from_value(value).unwrap());
            }
        }
    }
}

pub(crate) struct TestHub {
    pub(crate) hub: Hub,
    pub(crate) launcher: RecordingLauncher,
    assets: MemoryAssets,
    next_conn: usize,
}

impl TestHub {
    pub(crate) fn new(policy: LengthPolicy) -> Self {
        Self::with_launcher(policy, RecordingLauncher::default())
    }

    pub(crate) fn with_launcher(policy: LengthPolicy, launcher: RecordingLauncher) -> Self {
        Self::build(SessionStore::new(policy), launcher.clone(), Box::new(launcher))
    }

    /// A hub that starts real processes through `launcher`.
    ///
    /// Nothing is recorded, so [`TestHub::launched`] stays empty.
    pub(crate) fn with_process_launcher(policy: LengthPolicy, launcher: Box<dyn Launcher>) -> Self {
        Self::build(SessionStore::new(policy), RecordingLauncher::default(), launcher)
    }

    /// A hub whose dataset may not encode to more than `limit` bytes.
    pub(crate) fn with_snapshot_limit(policy: LengthPolicy, limit: usize) -> Self {
        let launcher = RecordingLauncher::default();
        Self::build(
            SessionStore::new(policy).with_snapshot_limit(limit),
            launcher.clone(),
            Box::new(launcher),
        )
    }

    fn build(store: SessionStore, recorder: RecordingLauncher, launcher: Box<dyn Launcher>) -> Self {
        let assets = MemoryAssets::default();
        let hub = Hub::new(
            store,
            AssetCache::new(Box::new(assets.clone()), "package.json", "components"),
            launcher,
            HubSettings::default(),
        );
        Self {
            hub,
            launcher: recorder,
            assets,
            next_conn: 0,
        }
    }

    pub(crate) fn add_asset(&self, path: &str, contents: &str) {
        self.assets
            .files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.to_string());
    }

    pub(crate) fn asset_reads(&self) -> usize {
        self.assets.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn launched(&self) -> Vec<LaunchRequest> {
        self.launcher.launched.lock().unwrap().clone()
    }

    /// Accept a connection without identifying it.
    pub(crate) fn connect_raw(&mut self) -> TestClient {
        self.next_conn += 1;
        let conn_id = format!("conn:test{}", self.next_conn);
        let (conn, rx) = ClientConn::detached(conn_id.clone());
        self.hub
            .handle_event(HubEvent::ClientConnected {
                conn_id: conn_id.clone(),
                conn,
            })
            .unwrap();
        TestClient {
            conn_id,
            id: None,
            rx,
            decoder: FrameDecoder::new(),
            inbox: Vec::new(),
        }
    }

    /// Connect and register a new client of `role`.
    pub(crate) fn connect(&mut self, role: ClientRole) -> TestClient {
        let mut client = self.connect_raw();
        self.send(&client, "hello", json!({ "role": role }));
        client.id = Some(welcome_id(&mut client));
        client
    }

    /// Connect as a client the hub pre-registered.
    pub(crate) fn connect_as(&mut self, id: &ClientId) -> TestClient {
        let mut client = self.connect_raw();
        self.send(&client, "hello", json!({ "role": "worker", "clientId": id }));
        client.id = Some(welcome_id(&mut client));
        client
    }

    pub(crate) fn send(&mut self, client: &TestClient, kind: &str, payload: Value) {
        self.try_send(client, kind, payload).unwrap();
    }

    pub(crate) fn try_send(&mut self, client: &TestClient, kind: &str, payload: Value) -> Result<(), HubError> {
        let msg = serde_json::to_value(Envelope::new(kind, payload)).unwrap();
        self.hub.handle_event(HubEvent::ClientMessage {
            conn_id: client.conn_id.clone(),
            msg,
        })
    }

    pub(crate) fn disconnect(&mut self, client: &TestClient) {
        self.hub
            .handle_event(HubEvent::ClientDisconnected {
                conn_id: client.conn_id.clone(),
            })
            .unwrap();
    }
}

fn welcome_id(client: &mut TestClient) -> ClientId {
    let welcome = client.next().expect("no welcome");
    assert_eq!(welcome.kind, "welcome", "{:?}", welcome.payload);
    serde_json::from_value(welcome.payload["clientId"].clone()).unwrap()
}
