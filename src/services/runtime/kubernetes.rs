//! kubelet, kubeadm and kubectl from the pkgs.k8s.io apt repository

use super::InstallOutcome;
use crate::config::{Version, paths};
use crate::utils::Downloader;
use crate::utils::exec::{CommandExecutor, PackageManager, run_checked, stdout_text};
use anyhow::{Context, Result};

pub const PACKAGES: &[&str] = &["kubelet", "kubeadm", "kubectl"];
const PREREQUISITES: &[&str] = &["apt-transport-https", "ca-certificates", "curl", "gpg"];

/// apt repository for the version's minor line
pub fn repository_url(version: &Version) -> String {
    format!(
        "https://pkgs.k8s.io/core:/stable:/v{}/deb/",
        version.minor_line()
    )
}

pub fn source_line(version: &Version) -> String {
    format!(
        "deb [signed-by={}] {} /\n",
        paths::APT_KEYRING,
        repository_url(version)
    )
}

/// `kubelet=1.30.4-*` for exact releases, plain names for a minor line
pub fn package_specs(version: &Version) -> Vec<String> {
    PACKAGES
        .iter()
        .map(|pkg| match version.patch {
            Some(_) => format!("{}={}-*", pkg, version),
            None => pkg.to_string(),
        })
        .collect()
}

fn tool_version(exec: &dyn CommandExecutor, program: &str, args: &[&str]) -> Result<Option<String>> {
    if !exec.check_command_exists(program)? {
        return Ok(None);
    }
    let output = exec.execute_simple(program, args)?;
    Ok(output.status.success().then(|| stdout_text(&output)))
}

/// All three tools report the requested version
pub fn installed(exec: &dyn CommandExecutor, version: &Version) -> Result<bool> {
    let checks: [(&str, &[&str]); 3] = [
        ("kubeadm", &["version", "-o", "short"]),
        ("kubelet", &["--version"]),
        ("kubectl", &["version", "--client"]),
    ];
    for (program, args) in checks {
        match tool_version(exec, program, args)? {
            Some(reported) if version.matches(&reported) => {}
            Some(reported) => {
                tracing::debug!("{} reports '{}', want {}", program, reported, version);
                return Ok(false);
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn configure_repository(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    version: &Version,
    pkg_mgr: PackageManager,
) -> Result<()> {
    pkg_mgr.update(exec)?;
    pkg_mgr
        .install_packages(exec, PREREQUISITES)
        .context("Failed to install apt prerequisites")?;

    let key_url = format!("{}Release.key", repository_url(version));
    let key = downloader.fetch(&key_url)?;
    let key_file = format!("{}/kubernetes-release.key", paths::STATE_DIR);
    exec.mkdir_p(paths::STATE_DIR)?;
    exec.write_file(&key_file, &key)?;
    exec.mkdir_p(paths::APT_KEYRING_DIR)?;
    run_checked(
        exec,
        "gpg",
        &["--batch", "--yes", "--dearmor", "-o", paths::APT_KEYRING, &key_file],
    )
    .context("Failed to import the Kubernetes apt signing key")?;

    exec.write_file(paths::APT_SOURCE, source_line(version).as_bytes())?;
    pkg_mgr.update(exec)?;
    Ok(())
}

pub fn ensure(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    version: &Version,
    pkg_mgr: PackageManager,
) -> Result<InstallOutcome> {
    if installed(exec, version)? {
        tracing::info!("✓ kubelet, kubeadm and kubectl {} are already installed", version);
        return Ok(InstallOutcome::AlreadyPresent);
    }

    tracing::info!("Installing kubelet, kubeadm and kubectl {}...", version);
    configure_repository(exec, downloader, version, pkg_mgr)?;

    if let Err(e) = pkg_mgr.unhold(exec, PACKAGES) {
        tracing::debug!("unhold: {:#}", e);
    }
    let specs = package_specs(version);
    let specs: Vec<&str> = specs.iter().map(String::as_str).collect();
    pkg_mgr.install_packages(exec, &specs)?;

    if let Err(e) = pkg_mgr.hold(exec, PACKAGES) {
        tracing::warn!("Could not hold Kubernetes packages; they may be upgraded by apt: {:#}", e);
    }
    run_checked(exec, "systemctl", &["enable", "kubelet"]).context("Failed to enable kubelet")?;

    if !installed(exec, version)? {
        anyhow::bail!("packages were installed but the tools do not report version {}", version);
    }
    crate::success!("kubelet, kubeadm and kubectl {} installed", version);
    Ok(InstallOutcome::Installed)
}
