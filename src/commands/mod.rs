// Command routing
//
// Provisioning is the default action and takes its flags at the top level;
// everything else is a subcommand declared here and dispatched by `handle_command`.

pub mod provision;
pub mod reset;
pub mod status;

use crate::config::paths;
use crate::error::{Error, Result};
use clap::Subcommand;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the detected host, installed tool versions and bootstrap state
    Status,
    /// Run kubeadm reset and remove files generated by kubestrap
    Reset {
        /// Confirm that this node's Kubernetes state may be wiped
        #[arg(long)]
        yes: bool,
    },
}

/// Dispatch a subcommand
pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Status => step("status", status::handle_status()),
        Commands::Reset { yes } => step("reset", reset::handle_reset(yes)),
    }
}

/// Log a fatal error as an ERROR line naming the step that raised it
pub(crate) fn step<T>(name: &str, result: Result<T>) -> Result<T> {
    result.inspect_err(|e| tracing::error!("{} failed: {}", name, e))
}

/// Exclusive hold on the run lock; released when dropped
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

/// Take the run lock without waiting. A second concurrent run fails immediately.
pub fn acquire_lock(path: &str) -> Result<RunLock> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => Error::validation(format!(
                "cannot open {} ({}); kubestrap must run as root",
                path, e
            )),
            _ => Error::Host(anyhow::Error::new(e).context(format!("Failed to open {}", path))),
        })?;

    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Err(Error::validation(format!(
                "another kubestrap run holds {}; wait for it to finish",
                path
            )));
        }
        return Err(Error::Host(
            anyhow::Error::new(err).context(format!("Failed to lock {}", path)),
        ));
    }
    tracing::debug!("Holding {}", path);
    Ok(RunLock { _file: file })
}

/// Lock at the default location
pub fn acquire_run_lock() -> Result<RunLock> {
    acquire_lock(paths::LOCK_FILE)
}
