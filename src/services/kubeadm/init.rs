//! Control-plane initialization

use super::{ClusterBootstrapOutcome, kubeconfig, reset};
use crate::config::{ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::services::render::write_artifact_with_mode;
use crate::utils::exec::{CommandExecutor, combined_output, run_best_effort, stdout_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlaneState {
    NotInitialized,
    Initializing,
    Initialized,
    Failed,
}

fn transition(from: ControlPlaneState, to: ControlPlaneState) -> ControlPlaneState {
    tracing::debug!("control plane: {:?} -> {:?}", from, to);
    to
}

/// Current state as seen on disk
pub fn current_state(exec: &dyn CommandExecutor) -> Result<ControlPlaneState> {
    Ok(if exec.file_exists(paths::ADMIN_KUBECONFIG)? {
        ControlPlaneState::Initialized
    } else {
        ControlPlaneState::NotInitialized
    })
}

/// Save command output to a log file; failure to do so is not fatal
pub(crate) fn save_log(exec: &dyn CommandExecutor, path: &str, contents: &str) {
    let saved = exec
        .mkdir_p(paths::parent(path))
        .and_then(|_| exec.write_file(path, contents.as_bytes()));
    if let Err(e) = saved {
        tracing::warn!("Could not save {}: {:#}", path, e);
    }
}

/// Last `kubeadm join ...` line of the persisted join script
pub fn parse_join_script(script: &str) -> Option<String> {
    script
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.starts_with("kubeadm join"))
        .map(str::to_string)
}

pub fn render_join_script(join_command: &str) -> String {
    format!("#!/bin/sh\n# Generated by kubestrap; run as root on a worker node\n{}\n", join_command)
}

/// Join command persisted by an earlier run
pub fn persisted_join_command(exec: &dyn CommandExecutor) -> Option<String> {
    exec.read_file(paths::JOIN_COMMAND_FILE)
        .ok()
        .as_deref()
        .and_then(parse_join_script)
}

/// Mint a fresh bootstrap token and print the matching join command
pub fn create_join_command(exec: &dyn CommandExecutor, ttl: &str) -> Result<String> {
    let output = exec.execute_simple(
        "kubeadm",
        &[
            "token",
            "create",
            "--print-join-command",
            "--ttl",
            ttl,
            "--kubeconfig",
            paths::ADMIN_KUBECONFIG,
        ],
    )?;
    let command = stdout_text(&output);
    if !output.status.success() || !command.starts_with("kubeadm join") {
        return Err(Error::ClusterInit(format!(
            "could not create a join command: {}",
            combined_output(&output).trim()
        )));
    }
    Ok(command)
}

fn run_init(exec: &dyn CommandExecutor) -> Result<()> {
    if !run_best_effort(
        exec,
        "kubeadm",
        &["config", "images", "pull", "--config", paths::KUBEADM_CONFIG],
    ) {
        tracing::warn!("Pre-pulling control-plane images failed; kubeadm init will pull them");
    }

    tracing::info!("Running kubeadm init (log: {})...", paths::KUBEADM_INIT_LOG);
    let output = exec.execute_simple(
        "kubeadm",
        &[
            "init",
            "--config",
            paths::KUBEADM_CONFIG,
            "--upload-certs",
            "--ignore-preflight-errors=NumCPU,Mem",
        ],
    )?;
    let log = combined_output(&output);
    save_log(exec, paths::KUBEADM_INIT_LOG, &log);

    if !output.status.success() {
        let tail: Vec<&str> = log.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(Error::ClusterInit(format!(
            "exit code {} (see {}): {}",
            output.status.code().unwrap_or(-1),
            paths::KUBEADM_INIT_LOG,
            tail.join(" | ")
        )));
    }
    Ok(())
}

/// Drive the control plane to Initialized
pub fn initialize(
    exec: &dyn CommandExecutor,
    config: &ProvisioningConfig,
) -> Result<ClusterBootstrapOutcome> {
    let mut state = current_state(exec)?;

    if state == ControlPlaneState::Initialized {
        if !config.force_reset {
            tracing::info!("✓ Control plane already initialized ({} exists)", paths::ADMIN_KUBECONFIG);
            let join_command = persisted_join_command(exec);
            if join_command.is_none() {
                tracing::warn!(
                    "No join command on record; create one with: kubeadm token create --print-join-command"
                );
            }
            return Ok(ClusterBootstrapOutcome::Initialized {
                join_command,
                admin_kubeconfig: paths::ADMIN_KUBECONFIG.to_string(),
                already_initialized: true,
            });
        }
        reset::reset_node(exec)?;
        state = transition(state, ControlPlaneState::NotInitialized);
    }

    state = transition(state, ControlPlaneState::Initializing);
    if let Err(e) = run_init(exec) {
        transition(state, ControlPlaneState::Failed);
        return Err(e);
    }

    kubeconfig::materialize(exec, config.invoking_user.as_deref())?;

    let join_command = create_join_command(exec, &config.token_ttl)?;
    write_artifact_with_mode(
        exec,
        paths::JOIN_COMMAND_FILE,
        &render_join_script(&join_command),
        0o700,
    )?;
    transition(state, ControlPlaneState::Initialized);

    crate::success!("Control plane initialized at {}", config.api_server_address().unwrap_or_default());
    tracing::info!("Join command saved to {}", paths::JOIN_COMMAND_FILE);

    Ok(ClusterBootstrapOutcome::Initialized {
        join_command: Some(join_command),
        admin_kubeconfig: paths::ADMIN_KUBECONFIG.to_string(),
        already_initialized: false,
    })
}
