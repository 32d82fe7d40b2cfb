//! Post-bootstrap readiness check

use crate::config::{NodeRole, ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::pipeline::PhaseResult;
use crate::utils::exec::{CommandExecutor, stdout_text};
use std::thread;
use std::time::{Duration, Instant};

/// True when `kubectl get nodes -o json` lists at least one node
pub fn has_nodes(json: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(json)
        .ok()
        .and_then(|v| v.get("items").and_then(|items| items.as_array()).map(|items| !items.is_empty()))
        .unwrap_or(false)
}

fn poll(exec: &dyn CommandExecutor) -> bool {
    match exec.execute_simple(
        "kubectl",
        &["--kubeconfig", paths::ADMIN_KUBECONFIG, "get", "nodes", "-o", "json"],
    ) {
        Ok(output) if output.status.success() => has_nodes(&String::from_utf8_lossy(&output.stdout)),
        Ok(_) => false,
        Err(e) => {
            tracing::debug!("kubectl get nodes: {:#}", e);
            false
        }
    }
}

/// Poll the API server until it lists a node or `timeout` elapses
pub fn wait_for_nodes(exec: &dyn CommandExecutor, timeout: Duration, interval: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if poll(exec) {
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::ReadinessTimeout(timeout));
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

/// Verify phase
pub fn run(exec: &dyn CommandExecutor, config: &ProvisioningConfig) -> Result<PhaseResult> {
    if config.role == NodeRole::Worker {
        return Ok(PhaseResult::skipped(
            "verify",
            "run 'kubectl get nodes' on the control plane to confirm this node registered",
        ));
    }

    tracing::info!(
        "Waiting up to {}s for the API server to list nodes...",
        config.readiness_timeout.as_secs()
    );
    wait_for_nodes(exec, config.readiness_timeout, config.readiness_interval)?;

    if let Ok(output) = exec.execute_simple(
        "kubectl",
        &["--kubeconfig", paths::ADMIN_KUBECONFIG, "get", "nodes", "-o", "wide"],
    ) {
        let nodes = stdout_text(&output);
        if !nodes.is_empty() {
            tracing::info!("Cluster nodes:\n{}", nodes);
        }
    }

    crate::success!("Control plane is answering");
    Ok(PhaseResult::succeeded("verify", "API server lists nodes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionArgs;
    use crate::utils::testing::FakeHost;

    const NODES: &str = r#"{"apiVersion":"v1","items":[{"metadata":{"name":"cp-1"}}],"kind":"List"}"#;

    fn control_plane() -> ProvisioningConfig {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::ControlPlane),
            control_plane_endpoint: Some("cp.example.com".to_string()),
            ..Default::default()
        };
        let mut config = ProvisioningConfig::from_args(&args, None).unwrap();
        config.readiness_timeout = Duration::from_millis(200);
        config.readiness_interval = Duration::from_millis(20);
        config
    }

    #[test]
    fn test_has_nodes() {
        assert!(has_nodes(NODES));
        assert!(!has_nodes(r#"{"items":[]}"#));
        assert!(!has_nodes("The connection to the server was refused"));
    }

    #[test]
    fn test_ready_cluster_succeeds() {
        let host = FakeHost::ubuntu().respond("kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes -o json", 0, NODES, "");
        let result = run(&host, &control_plane()).unwrap();
        assert_eq!(result.status, crate::pipeline::PhaseStatus::Succeeded);
        assert!(host.ran("kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes -o wide"));
    }

    #[test]
    fn test_unreachable_api_server_times_out() {
        let host = FakeHost::ubuntu().respond("kubectl", 1, "", "connection refused");
        let config = control_plane();
        let start = Instant::now();
        let err = run(&host, &config).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::ReadinessTimeout(t) if t == config.readiness_timeout));
        assert!(elapsed >= config.readiness_timeout);
        assert!(elapsed < config.readiness_timeout + Duration::from_secs(2));
        assert!(host.commands().len() > 1);
    }

    #[test]
    fn test_worker_is_skipped() {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::Worker),
            join_command: Some("kubeadm join cp:6443 --token a.b".to_string()),
            ..Default::default()
        };
        let config = ProvisioningConfig::from_args(&args, None).unwrap();
        let host = FakeHost::ubuntu();
        let result = run(&host, &config).unwrap();
        assert_eq!(result.status, crate::pipeline::PhaseStatus::SkippedAlreadySatisfied);
        assert!(!host.ran("kubectl"));
    }
}
