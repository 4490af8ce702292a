//! Daemon files: PID file and socket discovery.
//!
//! # File Layout
//!
//! ```text
//! /tmp/graphhub-{uid}/
//!   hub.sock             # Unix domain socket for IPC
//!   hub.sock.pid         # PID of the hub serving hub.sock
//! ```
//!
//! Each socket has its own PID file, so hubs started with different
//! `--socket` paths run side by side.
//!
//! Sockets live in `/tmp` because macOS limits Unix socket paths to 104 bytes,
//! and `~/Library/Application Support/...` exceeds that.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default Unix socket path for the current user.
///
/// Creates `/tmp/graphhub-{uid}/` with mode 0700 if it does not exist.
pub fn default_socket_path() -> Result<PathBuf> {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let dir = PathBuf::from(format!("/tmp/graphhub-{uid}"));
    if !dir.exists() {
        // Created 0700 under umask 077.
        // SAFETY: umask only swaps the process file-mode mask.
        let old_umask = unsafe { libc::umask(0o077) };
        let result = fs::create_dir_all(&dir);
        // SAFETY: as above, restoring the previous mask.
        unsafe {
            libc::umask(old_umask);
        }
        result.with_context(|| format!("Failed to create socket directory: {}", dir.display()))?;
    }
    Ok(dir.join("hub.sock"))
}

/// Path of the PID file for the hub serving `socket_path`.
pub fn pid_file_path(socket_path: &Path) -> PathBuf {
    let mut name = socket_path.as_os_str().to_owned();
    name.push(".pid");
    PathBuf::from(name)
}

/// Record the current process as the hub serving `socket_path`.
pub fn write_pid_file(socket_path: &Path) -> Result<()> {
    let path = pid_file_path(socket_path);
    let pid = std::process::id();
    fs::write(&path, pid.to_string())
        .with_context(|| format!("Failed to write PID file: {}", path.display()))?;
    log::info!("Wrote PID file: {} (pid={})", path.display(), pid);
    Ok(())
}

/// Read the PID recorded for `socket_path`.
pub fn read_pid_file(socket_path: &Path) -> Option<u32> {
    fs::read_to_string(pid_file_path(socket_path))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// PID of another live hub serving `socket_path`, if there is one.
pub fn running_hub(socket_path: &Path) -> Option<u32> {
    read_pid_file(socket_path).filter(|&pid| pid != std::process::id() && pid_alive(pid))
}

fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence check only.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Remove the PID file and `socket_path` left behind by a dead hub.
///
/// No-op if the recorded hub is still running.
///
/// # Errors
///
/// Returns an error if a live hub already owns the files.
pub fn cleanup_stale_files(socket_path: &Path) -> Result<()> {
    if let Some(pid) = running_hub(socket_path) {
        anyhow::bail!("A hub is already running (pid {pid}) on {}", socket_path.display());
    }

    let pid_path = pid_file_path(socket_path);
    if pid_path.exists() {
        let _ = fs::remove_file(&pid_path);
        log::debug!("Removed stale PID file: {}", pid_path.display());
    }
    if socket_path.exists() {
        let _ = fs::remove_file(socket_path);
        log::debug!("Removed stale socket file: {}", socket_path.display());
    }
    Ok(())
}

/// Remove the PID file and socket on shutdown.
pub fn cleanup_on_shutdown(socket_path: &Path) {
    let _ = fs::remove_file(pid_file_path(socket_path));
    let _ = fs::remove_file(socket_path);
    log::info!("Cleaned up daemon files for {}", socket_path.display());
}
