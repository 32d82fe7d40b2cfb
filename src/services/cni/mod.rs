//! Pod network installation (control plane only)

pub mod cilium;
pub mod manifest;

use crate::config::{CniProvider, ProvisioningConfig};
use crate::error::Result;
use crate::pipeline::PhaseResult;
use crate::services::host::HostProfile;
use crate::services::kubeadm::ClusterBootstrapOutcome;
use crate::utils::{CommandExecutor, Downloader};

/// CNI phase
pub fn install(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    config: &ProvisioningConfig,
    host: &HostProfile,
    outcome: &ClusterBootstrapOutcome,
) -> Result<PhaseResult> {
    match outcome {
        ClusterBootstrapOutcome::Joined { .. } => {
            return Ok(PhaseResult::skipped("cni", "pod network is managed by the control plane"));
        }
        ClusterBootstrapOutcome::Initialized {
            already_initialized: true,
            ..
        } => {
            return Ok(PhaseResult::skipped(
                "cni",
                "cluster was already initialized; pod network left as is",
            ));
        }
        ClusterBootstrapOutcome::Initialized { .. } => {}
    }
    if config.skip_cni {
        tracing::info!("Skipping pod network installation (--skip-cni)");
        return Ok(PhaseResult::skipped("cni", "--skip-cni given"));
    }

    tracing::info!("Installing {} {}...", config.cni, config.cni_version);
    let artifacts = match config.cni {
        CniProvider::Cilium => cilium::install(exec, downloader, config, host)?,
        CniProvider::Calico | CniProvider::Flannel => manifest::install(exec, downloader, config)?,
    };

    let ready = match config.cni {
        CniProvider::Cilium => cilium::wait_ready(exec, config.cni_wait_timeout),
        provider => manifest::wait_ready(exec, provider, config.cni_wait_timeout),
    };
    if ready {
        crate::success!("{} is ready", config.cni);
    } else {
        tracing::warn!(
            "{} did not report ready within {}s; pods may take longer to schedule",
            config.cni,
            config.cni_wait_timeout.as_secs()
        );
    }

    Ok(PhaseResult::succeeded(
        "cni",
        format!(
            "{} {} installed{}",
            config.cni,
            config.cni_version,
            if ready { "" } else { " (readiness not confirmed)" }
        ),
    )
    .with_artifacts(artifacts))
}
