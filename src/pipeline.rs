//! Phase sequencing
//!
//! validate → preflight → detect → prepare → install → configure → bootstrap →
//! cni → verify. Phases run one at a time; the first fatal error stops the run.

use crate::config::{NodeRole, ProvisioningConfig};
use crate::error::Result;
use crate::services::host::{self, HostProfile};
use crate::services::kubeadm::{self, ClusterBootstrapOutcome};
use crate::services::{cni, render, runtime, verify};
use crate::utils::{CommandExecutor, Downloader};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    SkippedAlreadySatisfied,
    Succeeded,
    Failed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PhaseStatus::SkippedAlreadySatisfied => "skipped",
            PhaseStatus::Succeeded => "ok",
            PhaseStatus::Failed => "failed",
        })
    }
}

/// What a phase did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseResult {
    pub phase: String,
    pub status: PhaseStatus,
    pub message: String,
    /// Paths written by the phase
    pub artifacts: Vec<String>,
}

impl PhaseResult {
    pub fn succeeded(phase: &str, message: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::Succeeded, message)
    }

    pub fn skipped(phase: &str, message: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::SkippedAlreadySatisfied, message)
    }

    pub fn failed(phase: &str, message: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::Failed, message)
    }

    fn new(phase: &str, status: PhaseStatus, message: impl Into<String>) -> Self {
        PhaseResult {
            phase: phase.to_string(),
            status,
            message: message.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Ordered phase results plus the bootstrap outcome
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub phases: Vec<PhaseResult>,
    pub outcome: Option<ClusterBootstrapOutcome>,
}

impl PipelineReport {
    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == name)
    }

    pub fn failed_phase(&self) -> Option<&PhaseResult> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Failed)
    }

    /// Every path written during the run, in phase order
    pub fn artifacts(&self) -> Vec<&str> {
        self.phases
            .iter()
            .flat_map(|p| p.artifacts.iter().map(String::as_str))
            .collect()
    }
}

pub struct Pipeline<'a> {
    exec: &'a dyn CommandExecutor,
    downloader: &'a dyn Downloader,
    config: &'a ProvisioningConfig,
    report: PipelineReport,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        exec: &'a dyn CommandExecutor,
        downloader: &'a dyn Downloader,
        config: &'a ProvisioningConfig,
    ) -> Self {
        Pipeline {
            exec,
            downloader,
            config,
            report: PipelineReport::default(),
        }
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    pub fn into_report(self) -> PipelineReport {
        self.report
    }

    /// Run every phase in order, stopping at the first fatal error
    pub fn run(&mut self) -> Result<()> {
        let exec = self.exec;
        let downloader = self.downloader;
        let config = self.config;

        self.record(
            "validate",
            Ok(((), PhaseResult::succeeded("validate", describe(config)))),
        )?;

        let pkg_mgr = self.record("preflight", host::preflight::run(exec, downloader))?;
        let profile: HostProfile = self.record("detect", host::detect::run(exec))?;

        self.record("prepare", host::prepare::run(exec, config).map(|r| ((), r)))?;
        self.record(
            "install",
            runtime::install(exec, downloader, config, &profile, pkg_mgr).map(|r| ((), r)),
        )?;
        self.record(
            "configure",
            render::run(exec, config, &profile).map(|r| ((), r)),
        )?;

        let outcome = self.record("bootstrap", kubeadm::bootstrap(exec, config))?;
        self.report.outcome = Some(outcome.clone());

        self.record(
            "cni",
            cni::install(exec, downloader, config, &profile, &outcome).map(|r| ((), r)),
        )?;
        self.record("verify", verify::run(exec, config).map(|r| ((), r)))?;

        Ok(())
    }

    fn record<T>(&mut self, phase: &str, result: Result<(T, PhaseResult)>) -> Result<T> {
        match result {
            Ok((value, phase_result)) => {
                match phase_result.status {
                    PhaseStatus::SkippedAlreadySatisfied => {
                        tracing::info!("{}: {} (already satisfied)", phase, phase_result.message)
                    }
                    _ => tracing::debug!("{}: {}", phase, phase_result.message),
                }
                self.report.phases.push(phase_result);
                Ok(value)
            }
            Err(e) => {
                tracing::error!("{} failed: {}", phase, e);
                self.report
                    .phases
                    .push(PhaseResult::failed(phase, e.to_string()));
                Err(e)
            }
        }
    }
}

fn describe(config: &ProvisioningConfig) -> String {
    match config.role {
        NodeRole::ControlPlane => format!(
            "control-plane node, Kubernetes {}, {} {}, pods {}, services {}",
            config.kubernetes_version,
            config.cni,
            config.cni_version,
            config.pod_network_cidr,
            config.service_cidr
        ),
        NodeRole::Worker => format!("worker node, Kubernetes {}", config.kubernetes_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProvisionArgs, paths};
    use crate::error::Error;
    use crate::utils::testing::{FakeDownloader, FakeHost};

    const JOIN: &str = "kubeadm join cp.example.com:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:00";
    const NODES: &str = r#"{"items":[{"metadata":{"name":"cp-1"}}]}"#;

    fn control_plane() -> ProvisioningConfig {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::ControlPlane),
            control_plane_endpoint: Some("cp.example.com".to_string()),
            ..Default::default()
        };
        ProvisioningConfig::from_args(&args, None).unwrap()
    }

    /// Ubuntu host with every component already at the default versions
    fn provisioned_host() -> FakeHost {
        FakeHost::ubuntu()
            .with_command("containerd")
            .with_command("kubeadm")
            .with_command("kubelet")
            .with_command("kubectl")
            .with_command("cilium")
            .with_file(paths::RUNC_BINARY, "")
            .with_file("/opt/cni/bin/.kubestrap-version", "1.5.1\n")
            .respond("containerd --version", 0, "containerd github.com/containerd/containerd v1.7.22 7f7fdf5\n", "")
            .respond("/usr/local/sbin/runc --version", 0, "runc version 1.1.14\n", "")
            .respond("kubeadm version", 0, "v1.30.4\n", "")
            .respond("kubelet --version", 0, "Kubernetes v1.30.4\n", "")
            .respond("kubectl version", 0, "Client Version: v1.30.4\n", "")
            .respond("kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes -o json", 0, NODES, "")
    }

    #[test]
    fn test_fresh_control_plane() {
        let host = provisioned_host()
            .creates("kubeadm init", paths::ADMIN_KUBECONFIG, "apiVersion: v1\n")
            .respond("kubeadm token create", 0, &format!("{}\n", JOIN), "");
        let dl = FakeDownloader::new();
        let config = control_plane();

        let mut pipeline = Pipeline::new(&host, &dl, &config);
        pipeline.run().unwrap();
        let report = pipeline.into_report();

        let order: Vec<&str> = report.phases.iter().map(|p| p.phase.as_str()).collect();
        assert_eq!(
            order,
            ["validate", "preflight", "detect", "prepare", "install", "configure", "bootstrap", "cni", "verify"]
        );
        assert_eq!(report.phase("install").unwrap().status, PhaseStatus::SkippedAlreadySatisfied);
        assert_eq!(report.phase("bootstrap").unwrap().status, PhaseStatus::Succeeded);
        assert_eq!(report.phase("cni").unwrap().status, PhaseStatus::Succeeded);
        assert!(report.artifacts().contains(&paths::JOIN_COMMAND_FILE));
        assert!(matches!(
            report.outcome,
            Some(ClusterBootstrapOutcome::Initialized { join_command: Some(ref c), .. }) if c == JOIN
        ));

        // Configuration lands before init, the pod network after it
        let commands = host.commands();
        let position = |prefix: &str| commands.iter().position(|c| c.starts_with(prefix)).unwrap();
        assert!(position("systemctl restart containerd") < position("kubeadm init"));
        assert!(position("kubeadm init") < position("cilium install"));
        assert!(position("cilium install") < position("kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes"));
    }

    #[test]
    fn test_rerun_after_init_mutates_nothing() {
        let host = provisioned_host()
            .with_file(paths::ADMIN_KUBECONFIG, "apiVersion: v1\n")
            .with_file(paths::JOIN_COMMAND_FILE, &format!("#!/bin/sh\n{}\n", JOIN));
        let dl = FakeDownloader::new();
        let config = control_plane();

        let mut pipeline = Pipeline::new(&host, &dl, &config);
        pipeline.run().unwrap();
        let report = pipeline.report();

        let bootstrap = report.phase("bootstrap").unwrap();
        assert_eq!(bootstrap.status, PhaseStatus::SkippedAlreadySatisfied);
        assert!(bootstrap.message.contains("already initialized"));
        assert_eq!(report.phase("cni").unwrap().status, PhaseStatus::SkippedAlreadySatisfied);
        assert_eq!(report.phase("install").unwrap().status, PhaseStatus::SkippedAlreadySatisfied);

        assert!(!host.ran("kubeadm init"));
        assert!(!host.ran("kubeadm reset"));
        assert!(!host.ran("kubeadm token"));
        assert!(!host.ran("kubectl --kubeconfig /etc/kubernetes/admin.conf apply"));
        assert!(!host.ran("cilium install"));
        assert!(!host.ran("apt-get install"));
        assert!(dl.fetched().is_empty());
        assert!(host.file(paths::KUBEADM_CONFIG).is_none());
    }

    #[test]
    fn test_config_write_failure_halts_before_bootstrap() {
        let host = provisioned_host().read_only("/etc/containerd");
        let dl = FakeDownloader::new();
        let config = control_plane();

        let mut pipeline = Pipeline::new(&host, &dl, &config);
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::ConfigWrite { ref path, .. } if path == paths::CONTAINERD_CONFIG));

        let report = pipeline.report();
        assert_eq!(report.failed_phase().unwrap().phase, "configure");
        assert!(report.phase("bootstrap").is_none());
        assert!(!host.ran("kubeadm init"));
    }

    #[test]
    fn test_preflight_failure_touches_nothing() {
        let host = provisioned_host().with_user("alice");
        let dl = FakeDownloader::new();
        let config = control_plane();

        let mut pipeline = Pipeline::new(&host, &dl, &config);
        assert!(matches!(pipeline.run(), Err(Error::Validation(_))));
        assert_eq!(pipeline.report().failed_phase().unwrap().phase, "preflight");
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_worker_joins_and_skips_control_plane_phases() {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::Worker),
            token: Some("abcde.0123456789abcdef".to_string()),
            control_plane_endpoint: Some("cp.example.com:6443".to_string()),
            ..Default::default()
        };
        let config = ProvisioningConfig::from_args(&args, None).unwrap();
        let host = provisioned_host();
        let dl = FakeDownloader::new();

        let mut pipeline = Pipeline::new(&host, &dl, &config);
        pipeline.run().unwrap();
        let report = pipeline.report();

        assert_eq!(report.phase("bootstrap").unwrap().status, PhaseStatus::Succeeded);
        assert_eq!(report.phase("cni").unwrap().status, PhaseStatus::SkippedAlreadySatisfied);
        assert_eq!(report.phase("verify").unwrap().status, PhaseStatus::SkippedAlreadySatisfied);
        assert!(host.file(paths::KUBEADM_CONFIG).is_none());
        assert!(host.ran(
            "kubeadm join cp.example.com:6443 --token abcde.0123456789abcdef --discovery-token-unsafe-skip-ca-verification"
        ));
    }
}
