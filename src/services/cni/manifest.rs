//! Manifest-based providers (Calico, Flannel)

use crate::config::{CniProvider, ProvisioningConfig, Version, paths};
use crate::error::{Error, Result};
use crate::services::render::write_artifact;
use crate::utils::Downloader;
use crate::utils::exec::{CommandExecutor, combined_output};
use std::time::Duration;

/// Where the applied manifest is kept
pub fn manifest_path(provider: CniProvider) -> String {
    format!("{}/cni-{}.yaml", paths::STATE_DIR, provider.name())
}

pub fn manifest_url(provider: CniProvider, version: &Version) -> String {
    match provider {
        CniProvider::Calico => format!(
            "https://raw.githubusercontent.com/projectcalico/calico/v{}/manifests/calico.yaml",
            version
        ),
        CniProvider::Flannel => format!(
            "https://github.com/flannel-io/flannel/releases/download/v{}/kube-flannel.yml",
            version
        ),
        CniProvider::Cilium => format!(
            "https://raw.githubusercontent.com/cilium/cilium/v{}/install/kubernetes/quick-install.yaml",
            version
        ),
    }
}

/// DaemonSet whose rollout marks the network ready, as `(namespace, name)`
fn daemonset(provider: CniProvider) -> (&'static str, &'static str) {
    match provider {
        CniProvider::Calico => ("kube-system", "calico-node"),
        CniProvider::Flannel => ("kube-flannel", "kube-flannel-ds"),
        CniProvider::Cilium => ("kube-system", "cilium"),
    }
}

/// Point the manifest at `cidr` when it differs from the provider default.
/// Calico ships its pool setting commented out, so it is enabled as well.
pub fn rewrite_pod_cidr(manifest: &str, provider: CniProvider, cidr: &str) -> Option<String> {
    let default = provider.default_pod_cidr();
    if cidr == default || !manifest.contains(default) {
        return None;
    }

    let mut out = String::with_capacity(manifest.len());
    for line in manifest.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let line = match trimmed {
            t if provider == CniProvider::Calico && t.starts_with("# - name: CALICO_IPV4POOL_CIDR") => {
                format!("{}{}", indent, t.trim_start_matches("# "))
            }
            t if provider == CniProvider::Calico
                && t.starts_with("#   value:")
                && t.contains(default) =>
            {
                format!("{}  {}", indent, t.trim_start_matches("#").trim_start())
            }
            _ => line.to_string(),
        };
        out.push_str(&line.replace(default, cidr));
        out.push('\n');
    }
    Some(out)
}

pub fn install(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    config: &ProvisioningConfig,
) -> Result<Vec<String>> {
    let provider = config.cni;
    let url = manifest_url(provider, &config.cni_version);
    let body = downloader
        .fetch(&url)
        .map_err(|e| Error::installation(provider.name(), e))?;
    let mut manifest = String::from_utf8_lossy(&body).to_string();

    let cidr = config.pod_network_cidr.to_string();
    if cidr != provider.default_pod_cidr() {
        match rewrite_pod_cidr(&manifest, provider, &cidr) {
            Some(rewritten) => {
                tracing::info!("Using pod CIDR {} in the {} manifest", cidr, provider);
                manifest = rewritten;
            }
            None => tracing::warn!(
                "{} manifest has no {} to rewrite; pods may use the provider default",
                provider,
                provider.default_pod_cidr()
            ),
        }
    }

    let path = manifest_path(provider);
    write_artifact(exec, &path, &manifest)?;

    let output = exec.execute_simple(
        "kubectl",
        &["--kubeconfig", paths::ADMIN_KUBECONFIG, "apply", "-f", &path],
    )?;
    if !output.status.success() {
        return Err(Error::installation(provider.name(), combined_output(&output).trim()));
    }
    Ok(vec![path])
}

/// Wait for the provider's DaemonSet rollout; false on timeout or error
pub fn wait_ready(exec: &dyn CommandExecutor, provider: CniProvider, timeout: Duration) -> bool {
    let (namespace, name) = daemonset(provider);
    let target = format!("daemonset/{}", name);
    let timeout = format!("--timeout={}s", timeout.as_secs());
    exec.execute_simple(
        "kubectl",
        &[
            "--kubeconfig",
            paths::ADMIN_KUBECONFIG,
            "rollout",
            "status",
            &target,
            "-n",
            namespace,
            &timeout,
        ],
    )
    .map(|output| output.status.success())
    .unwrap_or(false)
}
