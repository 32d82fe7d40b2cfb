//! Tear this node back down

use super::acquire_run_lock;
use crate::error::{Error, Result};
use crate::services::host::preflight::require_root;
use crate::services::kubeadm::reset::{remove_artifacts, reset_node};
use crate::utils::exec::CommandExecutor;
use crate::utils::LocalExecutor;

pub fn handle_reset(yes: bool) -> Result<()> {
    if !yes {
        return Err(Error::validation(
            "reset wipes this node's Kubernetes state; re-run with --yes to confirm",
        ));
    }

    let exec = LocalExecutor;
    require_root(&exec)?;
    let _lock = acquire_run_lock()?;

    let removed = reset(&exec)?;
    crate::success!("Node reset ({} generated paths removed)", removed.len());
    Ok(())
}

/// `kubeadm reset` when kubeadm is present, then remove generated files
pub fn reset(exec: &dyn CommandExecutor) -> Result<Vec<String>> {
    if exec.check_command_exists("kubeadm")? {
        reset_node(exec)?;
    } else {
        tracing::warn!("kubeadm is not installed; only removing generated files");
    }

    let removed = remove_artifacts(exec);
    for path in &removed {
        tracing::info!("Removed {}", path);
    }
    Ok(removed)
}
