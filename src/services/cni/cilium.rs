//! Cilium through the cilium CLI

use crate::config::ProvisioningConfig;
use crate::error::{Error, Result};
use crate::services::host::{Arch, HostProfile};
use crate::services::runtime::install_from_tarball;
use crate::utils::download::verify_sha256;
use crate::utils::exec::{CommandExecutor, combined_output};
use crate::utils::Downloader;
use anyhow::Context;
use std::time::Duration;

pub const CLI_VERSION: &str = "v0.16.19";
const CLI_INSTALL_DIR: &str = "/usr/local/bin";
const POD_CIDR_SETTING: &str = "ipam.operator.clusterPoolIPv4PodCIDRList";

pub fn cli_url(arch: Arch) -> String {
    format!(
        "https://github.com/cilium/cilium-cli/releases/download/{}/cilium-linux-{}.tar.gz",
        CLI_VERSION,
        arch.as_str()
    )
}

/// Install the cilium CLI when it is missing, verifying the tarball first
pub fn ensure_cli(exec: &dyn CommandExecutor, downloader: &dyn Downloader, arch: Arch) -> anyhow::Result<bool> {
    if exec.check_command_exists("cilium")? {
        tracing::info!("✓ cilium CLI is already installed");
        return Ok(false);
    }

    tracing::info!("Installing cilium CLI {}...", CLI_VERSION);
    let url = cli_url(arch);
    let archive = downloader.fetch(&url)?;
    let checksum = downloader.fetch(&format!("{}.sha256sum", url))?;
    verify_sha256(&archive, &String::from_utf8_lossy(&checksum))
        .with_context(|| format!("Verification of {} failed", url))?;
    install_from_tarball(exec, &archive, CLI_INSTALL_DIR, |path| {
        path.rsplit('/').next() == Some("cilium")
    })?;
    Ok(true)
}

/// `cilium install` arguments; the pod CIDR is passed only when it is not Cilium's default
pub fn install_arguments(config: &ProvisioningConfig) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        "--version".to_string(),
        config.cni_version.to_string(),
    ];
    let cidr = config.pod_network_cidr.to_string();
    if cidr != config.cni.default_pod_cidr() {
        args.push("--set".to_string());
        args.push(format!("{}={}", POD_CIDR_SETTING, cidr));
    }
    args
}

pub fn install(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    config: &ProvisioningConfig,
    host: &HostProfile,
) -> Result<Vec<String>> {
    let mut artifacts = Vec::new();
    if ensure_cli(exec, downloader, host.arch).map_err(|e| Error::installation("cilium CLI", e))? {
        artifacts.push(format!("{}/cilium", CLI_INSTALL_DIR));
    }

    let args = install_arguments(config);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = exec.execute_simple("cilium", &args)?;
    if !output.status.success() {
        return Err(Error::installation("cilium", combined_output(&output).trim()));
    }
    Ok(artifacts)
}

/// Bounded readiness wait; false on timeout or error
pub fn wait_ready(exec: &dyn CommandExecutor, timeout: Duration) -> bool {
    let wait = format!("{}s", timeout.as_secs());
    exec.execute_simple("cilium", &["status", "--wait", "--wait-duration", &wait])
        .map(|output| output.status.success())
        .unwrap_or(false)
}
