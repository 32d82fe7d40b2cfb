//! runc static binary

use super::{InstallOutcome, install_file};
use crate::config::{Version, paths};
use crate::services::host::Arch;
use crate::utils::Downloader;
use crate::utils::download::{checksum_for, verify_sha256};
use crate::utils::exec::{CommandExecutor, stdout_text};
use anyhow::{Context, Result};

fn release_base(version: &Version) -> String {
    format!(
        "https://github.com/opencontainers/runc/releases/download/v{}",
        version
    )
}

fn asset_name(arch: Arch) -> String {
    format!("runc.{}", arch.as_str())
}

pub fn installed(exec: &dyn CommandExecutor, version: &Version) -> Result<bool> {
    if !exec.file_exists(paths::RUNC_BINARY)? {
        return Ok(false);
    }
    let output = exec.execute_simple(paths::RUNC_BINARY, &["--version"])?;
    Ok(output.status.success() && version.matches(&stdout_text(&output)))
}

pub fn ensure(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    version: &Version,
    arch: Arch,
) -> Result<InstallOutcome> {
    if installed(exec, version)? {
        tracing::info!("✓ runc {} is already installed", version);
        return Ok(InstallOutcome::AlreadyPresent);
    }

    tracing::info!("Installing runc {}...", version);
    let base = release_base(version);
    let asset = asset_name(arch);
    let binary = downloader.fetch(&format!("{}/{}", base, asset))?;
    let listing = downloader.fetch(&format!("{}/runc.sha256sum", base))?;
    let listing = String::from_utf8_lossy(&listing);
    let digest = checksum_for(&listing, &asset)
        .with_context(|| format!("runc.sha256sum has no entry for {}", asset))?;
    verify_sha256(&binary, digest).with_context(|| format!("Verification of {} failed", asset))?;

    install_file(exec, paths::RUNC_BINARY, &binary, 0o755)
        .with_context(|| format!("Failed to install {}", paths::RUNC_BINARY))?;

    if !installed(exec, version)? {
        anyhow::bail!("runc was installed but does not report version {}", version);
    }
    crate::success!("runc {} installed", version);
    Ok(InstallOutcome::Installed)
}
