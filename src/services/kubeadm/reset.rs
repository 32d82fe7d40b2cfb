//! Tearing a node back down

use crate::config::{CniProvider, paths};
use crate::utils::exec::{CommandExecutor, combined_output, run_best_effort};
use anyhow::Result;

const CNI_CONF_DIR: &str = "/etc/cni/net.d";

/// `kubeadm reset -f` against the containerd socket
pub fn reset_node(exec: &dyn CommandExecutor) -> Result<()> {
    tracing::warn!("Resetting existing Kubernetes state on this node");
    let socket = format!("--cri-socket={}", paths::cri_socket_uri());
    let output = exec.execute_simple("kubeadm", &["reset", "-f", &socket])?;
    if !output.status.success() {
        anyhow::bail!("kubeadm reset failed: {}", combined_output(&output).trim());
    }
    Ok(())
}

/// Files kubestrap or kubeadm leave behind that a reset should clear
pub fn generated_artifacts() -> Vec<String> {
    let mut artifacts = vec![
        paths::KUBEADM_CONFIG.to_string(),
        paths::JOIN_COMMAND_FILE.to_string(),
        paths::ROOT_KUBECONFIG.to_string(),
        CNI_CONF_DIR.to_string(),
    ];
    for provider in [CniProvider::Cilium, CniProvider::Calico, CniProvider::Flannel] {
        artifacts.push(crate::services::cni::manifest::manifest_path(provider));
    }
    artifacts
}

/// Remove generated artifacts. Best effort; returns what was removed.
pub fn remove_artifacts(exec: &dyn CommandExecutor) -> Vec<String> {
    let mut removed = Vec::new();
    for path in generated_artifacts() {
        if !exec.file_exists(&path).unwrap_or(false) {
            continue;
        }
        if run_best_effort(exec, "rm", &["-rf", &path]) {
            removed.push(path);
        } else {
            tracing::warn!("Could not remove {}", path);
        }
    }
    removed
}
