//! Window and worker process spawning.
//!
//! The hub never renders anything itself. When it needs a new window or a
//! worker it pre-registers a client, then asks a [`Launcher`] to start a
//! process for it. The process learns its identity from the environment:
//!
//! ```text
//! GRAPHHUB_SOCKET       hub socket path
//! GRAPHHUB_CLIENT_ID    id to present in `hello`
//! GRAPHHUB_WINDOW_TITLE window title
//! GRAPHHUB_WIDTH        window width in pixels
//! GRAPHHUB_HEIGHT       window height in pixels
//! GRAPHHUB_SHOW         "1" for visible windows, "0" for hidden workers
//! GRAPHHUB_ENV          runtime environment of the hub
//! GRAPHHUB_DATA_DIR     per-environment data directory, when known
//! GRAPHHUB_DEVTOOLS     "1" for visible windows in development
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use crate::client::ClientId;
use crate::env::Environment;

/// Parameters for one window or worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Pre-registered client id the process must present.
    pub client_id: ClientId,
    /// Window title.
    pub title: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the window is shown. Workers are hidden.
    pub show: bool,
    /// Entry point, relative to the asset root.
    pub entry: String,
}

impl LaunchRequest {
    /// The main window.
    pub fn primary(client_id: ClientId, entry: impl Into<String>) -> Self {
        Self {
            client_id,
            title: "main".to_string(),
            width: 1024,
            height: 768,
            show: true,
            entry: entry.into(),
        }
    }

    /// An additional view window. The view id doubles as the title.
    pub fn satellite(client_id: ClientId, view_id: &str) -> Self {
        Self {
            client_id,
            title: view_id.to_string(),
            width: 800,
            height: 600,
            show: true,
            entry: view_id.to_string(),
        }
    }

    /// A hidden worker window.
    pub fn worker(client_id: ClientId, title: &str, entry: impl Into<String>) -> Self {
        Self {
            client_id,
            title: title.to_string(),
            width: 800,
            height: 600,
            show: false,
            entry: entry.into(),
        }
    }
}

/// A process started by a [`Launcher`]. Killed when dropped.
#[derive(Debug)]
pub struct LaunchedProcess {
    child: Child,
}

impl LaunchedProcess {
    /// OS process id, if the process is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the process without waiting for it to exit.
    pub fn terminate(mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("[Launcher] Process already gone: {e}");
        }
    }
}

/// Capability to start window and worker processes.
pub trait Launcher: fmt::Debug + Send {
    /// Start a process for `request`.
    ///
    /// Returns `Ok(None)` when the launcher does not own a process handle
    /// (the client is expected to be started some other way).
    fn launch(&self, request: &LaunchRequest) -> Result<Option<LaunchedProcess>>;
}

/// Runs a configured command line with the entry point appended.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    socket_path: PathBuf,
    environment: Environment,
    data_dir: Option<PathBuf>,
}

impl CommandLauncher {
    /// Launcher for `program` with fixed leading `args`, in the current environment.
    pub fn new(program: impl Into<String>, args: Vec<String>, socket_path: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            socket_path,
            environment: Environment::current(),
            data_dir: None,
        }
    }

    /// Build a launcher from a whitespace-separated command line.
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command_line(command: &str, socket_path: PathBuf) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), socket_path))
    }

    /// Launch processes as if the hub ran in `environment`.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Hand processes a data directory scoped to the launcher's environment.
    #[must_use]
    pub fn with_data_root(mut self, root: &Path) -> Self {
        self.data_dir = Some(self.environment.data_dir(root));
        self
    }

    fn command(&self, request: &LaunchRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&request.entry)
            .env("GRAPHHUB_SOCKET", &self.socket_path)
            .env("GRAPHHUB_CLIENT_ID", request.client_id.as_str())
            .env("GRAPHHUB_WINDOW_TITLE", &request.title)
            .env("GRAPHHUB_WIDTH", request.width.to_string())
            .env("GRAPHHUB_HEIGHT", request.height.to_string())
            .env("GRAPHHUB_SHOW", if request.show { "1" } else { "0" })
            .env("GRAPHHUB_ENV", self.environment.to_string())
            .env_remove("GRAPHHUB_DEVTOOLS")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.data_dir {
            cmd.env("GRAPHHUB_DATA_DIR", dir);
        }
        if request.show && self.environment.is_development() {
            cmd.env("GRAPHHUB_DEVTOOLS", "1");
        }
        cmd
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<Option<LaunchedProcess>> {
        let child = self
            .command(request)
            .spawn()
            .with_context(|| format!("Failed to spawn {} for {}", self.program, request.entry))?;
        log::info!(
            "[Launcher] Started '{}' ({}) pid={:?} for {}",
            request.title,
            request.entry,
            child.id(),
            request.client_id
        );
        Ok(Some(LaunchedProcess { child }))
    }
}

/// Launcher used when no launch command is configured.
///
/// Logs what would have been started; the client can still connect by
/// presenting the logged id in `hello`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLauncher;

impl Launcher for NullLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<Option<LaunchedProcess>> {
        log::warn!(
            "[Launcher] No launch command configured; start '{}' ({}) externally with GRAPHHUB_CLIENT_ID={}",
            request.title,
            request.entry,
            request.client_id
        );
        Ok(None)
    }
}
