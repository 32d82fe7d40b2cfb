//! Configuration rendering and verified writes
//!
//! Renderers are pure functions of the configuration and the host profile. Every
//! artifact is written last-write-wins and read back before the phase moves on.

pub mod containerd;
pub mod crictl;
pub mod kubeadm;
pub mod kubelet;

use crate::config::{NodeRole, ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::pipeline::PhaseResult;
use crate::services::host::HostProfile;
use crate::utils::exec::{CommandExecutor, run_best_effort};

/// Write `contents` to `path`, creating the parent directory, and verify it landed.
/// Returns whether the file changed.
pub fn write_artifact(exec: &dyn CommandExecutor, path: &str, contents: &str) -> Result<bool> {
    if let Ok(existing) = exec.read_file(path) {
        if existing == contents {
            tracing::debug!("{} is up to date", path);
            return Ok(false);
        }
    }

    exec.mkdir_p(paths::parent(path))
        .map_err(|e| Error::config_write(path, e))?;
    exec.write_file(path, contents.as_bytes())
        .map_err(|e| Error::config_write(path, e))?;

    match exec.read_file(path) {
        Ok(back) if back == contents => {
            tracing::debug!("Wrote {}", path);
            Ok(true)
        }
        Ok(_) => Err(Error::config_write(path, "content read back differs from what was written")),
        Err(e) => Err(Error::config_write(path, e)),
    }
}

/// [`write_artifact`] followed by a permission change
pub fn write_artifact_with_mode(
    exec: &dyn CommandExecutor,
    path: &str,
    contents: &str,
    mode: u32,
) -> Result<bool> {
    let changed = write_artifact(exec, path, contents)?;
    exec.set_mode(path, mode)
        .map_err(|e| Error::config_write(path, e))?;
    Ok(changed)
}

/// Configuration phase
pub fn run(
    exec: &dyn CommandExecutor,
    config: &ProvisioningConfig,
    host: &HostProfile,
) -> Result<PhaseResult> {
    let driver = host.cgroup_driver();
    let mut artifacts = Vec::new();
    let mut runtime_changed = false;
    let mut kubelet_changed = false;

    runtime_changed |= write_artifact(exec, paths::CONTAINERD_CONFIG, &containerd::render(driver)?)?;
    artifacts.push(paths::CONTAINERD_CONFIG.to_string());

    write_artifact(exec, paths::CRICTL_CONFIG, &crictl::render())?;
    artifacts.push(paths::CRICTL_CONFIG.to_string());

    kubelet_changed |= write_artifact(exec, paths::KUBELET_DROPIN, &kubelet::render_dropin())?;
    artifacts.push(paths::KUBELET_DROPIN.to_string());
    kubelet_changed |= write_artifact(exec, paths::KUBELET_DEFAULTS, &kubelet::render_defaults(driver))?;
    artifacts.push(paths::KUBELET_DEFAULTS.to_string());

    if config.role == NodeRole::ControlPlane {
        // An initialized cluster keeps the document it was created from, token included
        let initialized = exec.file_exists(paths::ADMIN_KUBECONFIG).unwrap_or(false);
        if initialized && !config.force_reset {
            tracing::debug!("Cluster already initialized; keeping {}", paths::KUBEADM_CONFIG);
        } else {
            write_artifact(exec, paths::KUBEADM_CONFIG, &kubeadm::render(config, host)?)?;
            artifacts.push(paths::KUBEADM_CONFIG.to_string());
        }
    }

    if (runtime_changed || kubelet_changed) && !run_best_effort(exec, "systemctl", &["daemon-reload"]) {
        tracing::warn!("systemctl daemon-reload failed");
    }
    if runtime_changed && !run_best_effort(exec, "systemctl", &["restart", "containerd"]) {
        tracing::warn!("Failed to restart containerd; it may still run with the previous config");
    }

    tracing::info!("Rendered configuration for the {} cgroup driver", driver);
    Ok(PhaseResult::succeeded(
        "configure",
        format!("{} files rendered (cgroup driver {})", artifacts.len(), driver),
    )
    .with_artifacts(artifacts))
}
