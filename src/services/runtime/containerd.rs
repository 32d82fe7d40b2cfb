//! containerd from the upstream release tarball

use super::{InstallOutcome, install_file, install_from_tarball};
use crate::config::{Version, paths};
use crate::services::host::Arch;
use crate::utils::download::verify_sha256;
use crate::utils::exec::{CommandExecutor, PackageManager, run_best_effort, run_checked, stdout_text};
use crate::utils::Downloader;
use anyhow::{Context, Result};

const INSTALL_DIR: &str = "/usr/local/bin";
const CONFLICTING_PACKAGES: &[&str] = &["containerd", "containerd.io"];

const SYSTEMD_UNIT: &str = r#"# Managed by kubestrap
[Unit]
Description=containerd container runtime
Documentation=https://containerd.io
After=network.target local-fs.target

[Service]
ExecStartPre=-/sbin/modprobe overlay
ExecStart=/usr/local/bin/containerd
Type=notify
Delegate=yes
KillMode=process
Restart=always
RestartSec=5
LimitNPROC=infinity
LimitCORE=infinity
TasksMax=infinity
OOMScoreAdjust=-999

[Install]
WantedBy=multi-user.target
"#;

pub fn release_url(version: &Version, arch: Arch) -> String {
    format!(
        "https://github.com/containerd/containerd/releases/download/v{v}/containerd-{v}-linux-{arch}.tar.gz",
        v = version,
        arch = arch.as_str()
    )
}

/// `containerd --version` reports the requested release
pub fn installed(exec: &dyn CommandExecutor, version: &Version) -> Result<bool> {
    if !exec.check_command_exists("containerd")? {
        return Ok(false);
    }
    let output = exec.execute_simple("containerd", &["--version"])?;
    Ok(output.status.success() && version.matches(&stdout_text(&output)))
}

/// Daemon state as reported by `systemctl is-active`
pub fn is_active(exec: &dyn CommandExecutor) -> bool {
    exec.execute_simple("systemctl", &["is-active", "containerd"])
        .map(|output| output.status.success() && stdout_text(&output) == "active")
        .unwrap_or(false)
}

/// Start the daemon if needed and insist that it runs
pub fn ensure_running(exec: &dyn CommandExecutor) -> Result<()> {
    if is_active(exec) {
        return Ok(());
    }
    tracing::info!("Starting containerd...");
    run_checked(exec, "systemctl", &["enable", "--now", "containerd"])
        .context("Failed to start containerd")?;
    if !is_active(exec) {
        anyhow::bail!("containerd is not running (check: journalctl -u containerd)");
    }
    Ok(())
}

pub fn ensure(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    version: &Version,
    arch: Arch,
    pkg_mgr: PackageManager,
) -> Result<InstallOutcome> {
    if installed(exec, version)? {
        tracing::info!("✓ containerd {} is already installed", version);
        ensure_running(exec)?;
        return Ok(InstallOutcome::AlreadyPresent);
    }

    tracing::info!("Installing containerd {} ({})...", version, arch.as_str());
    let _ = run_best_effort(exec, "systemctl", &["stop", "containerd"]);
    if let Err(e) = pkg_mgr.remove_packages(exec, CONFLICTING_PACKAGES) {
        tracing::warn!("Could not remove distribution containerd packages: {:#}", e);
    }

    let url = release_url(version, arch);
    let archive = downloader.fetch(&url)?;
    let checksum = downloader.fetch(&format!("{}.sha256sum", url))?;
    let checksum = String::from_utf8_lossy(&checksum);
    verify_sha256(&archive, &checksum).with_context(|| format!("Verification of {} failed", url))?;

    let binaries = install_from_tarball(exec, &archive, INSTALL_DIR, |path| {
        path.starts_with("bin/")
    })?;
    tracing::debug!("Installed {}", binaries.join(", "));

    install_file(exec, paths::CONTAINERD_UNIT, SYSTEMD_UNIT.as_bytes(), 0o644)
        .with_context(|| format!("Failed to write {}", paths::CONTAINERD_UNIT))?;
    run_checked(exec, "systemctl", &["daemon-reload"])?;
    run_checked(exec, "systemctl", &["enable", "--now", "containerd"])
        .context("Failed to start containerd")?;
    ensure_running(exec)?;

    if !installed(exec, version)? {
        anyhow::bail!("containerd was installed but does not report version {}", version);
    }
    crate::success!("containerd {} installed", version);
    Ok(InstallOutcome::Installed)
}
