//! Cluster bootstrap through kubeadm
//!
//! Control plane: NotInitialized → Initializing → Initialized | Failed.
//! Worker: NotJoined → Joining → Joined | Failed.
//! The presence of the kubelet's credentials stands in for persisted state, so a
//! re-run finds the node already bootstrapped and performs no cluster mutation.

pub mod init;
pub mod join;
pub mod kubeconfig;
pub mod reset;

use crate::config::{NodeRole, ProvisioningConfig, paths};
use crate::error::Result;
use crate::pipeline::PhaseResult;
use crate::utils::CommandExecutor;

/// Where the bootstrap phase left the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterBootstrapOutcome {
    Initialized {
        /// Join command for workers, when one is on record
        join_command: Option<String>,
        admin_kubeconfig: String,
        already_initialized: bool,
    },
    Joined {
        join_command: String,
        already_joined: bool,
    },
}

impl ClusterBootstrapOutcome {
    /// True when the node was bootstrapped by an earlier run
    pub fn was_already_bootstrapped(&self) -> bool {
        match self {
            ClusterBootstrapOutcome::Initialized {
                already_initialized,
                ..
            } => *already_initialized,
            ClusterBootstrapOutcome::Joined { already_joined, .. } => *already_joined,
        }
    }
}

/// Bootstrap phase
pub fn bootstrap(
    exec: &dyn CommandExecutor,
    config: &ProvisioningConfig,
) -> Result<(ClusterBootstrapOutcome, PhaseResult)> {
    let outcome = match config.role {
        NodeRole::ControlPlane => init::initialize(exec, config)?,
        NodeRole::Worker => join::join(exec, config)?,
    };

    let result = match &outcome {
        ClusterBootstrapOutcome::Initialized {
            already_initialized: true,
            ..
        } => PhaseResult::skipped("bootstrap", "control plane already initialized"),
        ClusterBootstrapOutcome::Joined {
            already_joined: true,
            ..
        } => PhaseResult::skipped("bootstrap", "node already joined"),
        ClusterBootstrapOutcome::Initialized { .. } => {
            PhaseResult::succeeded("bootstrap", "control plane initialized").with_artifacts(vec![
                paths::KUBEADM_INIT_LOG.to_string(),
                paths::JOIN_COMMAND_FILE.to_string(),
                paths::ROOT_KUBECONFIG.to_string(),
            ])
        }
        ClusterBootstrapOutcome::Joined { .. } => PhaseResult::succeeded("bootstrap", "node joined")
            .with_artifacts(vec![paths::KUBEADM_JOIN_LOG.to_string()]),
    };
    Ok((outcome, result))
}
