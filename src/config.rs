//! Configuration loading and persistence.
//!
//! Settings are read from `config.json` in the config directory, then
//! overridden by `GRAPHHUB_*` environment variables, then by CLI flags in
//! `main.rs`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::LengthPolicy;

/// Configuration for the hub.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Unix socket path. Defaults to `/tmp/graphhub-{uid}/hub.sock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// Directory that manifest and component paths are relative to.
    pub asset_root: PathBuf,
    /// Build manifest served by `get-manifest`.
    pub manifest_file: String,
    /// Directory under `asset_root` holding components.
    pub components_dir: String,
    /// What to do with positional updates of the wrong length.
    pub length_policy: LengthPolicy,
    /// Command used to start windows and workers; the entry point is appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_command: Option<String>,
    /// Entry point of the primary window.
    pub primary_entry: String,
    /// Launch the primary window at startup.
    pub launch_primary: bool,
    /// Seconds a launched client may take to signal readiness.
    pub ready_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: None,
            asset_root: PathBuf::from("."),
            manifest_file: "package.json".to_string(),
            components_dir: "components".to_string(),
            length_policy: LengthPolicy::Strict,
            launch_command: None,
            primary_entry: "index.html".to_string(),
            launch_primary: false,
            ready_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/graphhub-test`
    /// 2. `GRAPHHUB_CONFIG_DIR` env var
    /// 3. `GRAPHHUB_ENV=test`: `tmp/graphhub-test`
    /// 4. Default: platform config dir
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/graphhub-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("GRAPHHUB_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/graphhub-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("graphhub")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; an unreadable one is an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))
    }

    /// Apply `GRAPHHUB_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric or policy values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("GRAPHHUB_SOCKET") {
            self.socket_path = Some(PathBuf::from(path));
        }

        if let Some(root) = lookup("GRAPHHUB_ASSET_ROOT") {
            self.asset_root = PathBuf::from(root);
        }

        if let Some(manifest) = lookup("GRAPHHUB_MANIFEST") {
            self.manifest_file = manifest;
        }

        if let Some(policy) = lookup("GRAPHHUB_LENGTH_POLICY") {
            match policy.parse() {
                Ok(policy) => self.length_policy = policy,
                Err(e) => log::warn!("Ignoring GRAPHHUB_LENGTH_POLICY: {e}"),
            }
        }

        if let Some(command) = lookup("GRAPHHUB_LAUNCH_COMMAND") {
            self.launch_command = Some(command).filter(|c| !c.trim().is_empty());
        }

        if let Some(timeout) = lookup("GRAPHHUB_READY_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.ready_timeout_secs = secs,
                Err(e) => log::warn!("Ignoring GRAPHHUB_READY_TIMEOUT={timeout}: {e}"),
            }
        }
    }

    /// Persist the configuration to disk (owner read/write only).
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    /// Socket path, falling back to the per-user default.
    pub fn resolved_socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => crate::hub::daemon::default_socket_path(),
        }
    }

    /// Ready timeout as a [`Duration`].
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
