//! Worker join

use super::init::save_log;
use super::{ClusterBootstrapOutcome, reset};
use crate::config::{JoinSource, ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::utils::exec::{CommandExecutor, combined_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotJoined,
    Joining,
    Joined,
    Failed,
}

fn transition(from: WorkerState, to: WorkerState) -> WorkerState {
    tracing::debug!("worker: {:?} -> {:?}", from, to);
    to
}

pub fn current_state(exec: &dyn CommandExecutor) -> Result<WorkerState> {
    Ok(if exec.file_exists(paths::KUBELET_KUBECONFIG)? {
        WorkerState::Joined
    } else {
        WorkerState::NotJoined
    })
}

/// kubeadm arguments for joining, starting with `join`
pub fn join_arguments(config: &ProvisioningConfig) -> Result<String> {
    let join = config
        .join
        .as_ref()
        .ok_or_else(|| Error::validation("a worker node needs --join-command or --token"))?;

    let mut command = match join {
        JoinSource::Token(token) => {
            let address = config.api_server_address().ok_or_else(|| {
                Error::validation("--token requires --control-plane-endpoint on a worker node")
            })?;
            format!(
                "join {} --token {} --discovery-token-unsafe-skip-ca-verification",
                address,
                token.as_str()
            )
        }
        JoinSource::Command(raw) => {
            let mut words: Vec<&str> = raw.split_whitespace().collect();
            while matches!(words.first(), Some(&"sudo") | Some(&"kubeadm")) {
                words.remove(0);
            }
            if words.first() != Some(&"join") || words.len() < 2 {
                return Err(Error::validation(format!(
                    "join command must look like 'kubeadm join <host:port> ...', got '{}'",
                    raw
                )));
            }
            words.join(" ")
        }
    };

    if !command.contains("--cri-socket") {
        command.push_str(&format!(" --cri-socket={}", paths::cri_socket_uri()));
    }
    Ok(command)
}

/// Drive the worker to Joined
pub fn join(exec: &dyn CommandExecutor, config: &ProvisioningConfig) -> Result<ClusterBootstrapOutcome> {
    let arguments = join_arguments(config)?;
    let mut state = current_state(exec)?;

    if state == WorkerState::Joined {
        if !config.force_reset {
            tracing::info!("✓ Node already joined ({} exists)", paths::KUBELET_KUBECONFIG);
            return Ok(ClusterBootstrapOutcome::Joined {
                join_command: arguments,
                already_joined: true,
            });
        }
        reset::reset_node(exec)?;
        state = transition(state, WorkerState::NotJoined);
    }

    state = transition(state, WorkerState::Joining);
    tracing::info!("Running kubeadm join (log: {})...", paths::KUBEADM_JOIN_LOG);
    let args: Vec<&str> = arguments.split_whitespace().collect();
    let output = exec.execute_simple("kubeadm", &args)?;
    let log = combined_output(&output);
    save_log(exec, paths::KUBEADM_JOIN_LOG, &log);

    if !output.status.success() {
        transition(state, WorkerState::Failed);
        let last = log.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
        return Err(Error::ClusterJoin(format!(
            "exit code {} (see {}): {}",
            output.status.code().unwrap_or(-1),
            paths::KUBEADM_JOIN_LOG,
            last.trim()
        )));
    }

    transition(state, WorkerState::Joined);
    crate::success!("Node joined the cluster");
    Ok(ClusterBootstrapOutcome::Joined {
        join_command: arguments,
        already_joined: false,
    })
}
