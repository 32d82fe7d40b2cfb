//! Container runtime and Kubernetes tool installation
//!
//! Each installer checks for the requested version first and returns without
//! touching the host when it is already there. Download or install failures abort
//! the pipeline with [`Error::Installation`].

pub mod cni_plugins;
pub mod containerd;
pub mod kubernetes;
pub mod runc;

use crate::config::ProvisioningConfig;
use crate::error::{Error, Result};
use crate::pipeline::PhaseResult;
use crate::services::host::HostProfile;
use crate::utils::download::unpack_tar_gz;
use crate::utils::{CommandExecutor, Downloader, PackageManager};
use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyPresent,
    Installed,
}

/// Install a file through the executor, replacing any previous copy atomically
pub(crate) fn install_file(
    exec: &dyn CommandExecutor,
    path: &str,
    contents: &[u8],
    mode: u32,
) -> anyhow::Result<()> {
    exec.mkdir_p(crate::config::paths::parent(path))?;
    exec.replace_file(path, contents, mode)
}

/// Unpack a `.tar.gz` and install the files accepted by `select` into `dest_dir`.
/// Returns the installed paths.
pub(crate) fn install_from_tarball(
    exec: &dyn CommandExecutor,
    archive: &[u8],
    dest_dir: &str,
    select: impl Fn(&str) -> bool,
) -> anyhow::Result<Vec<String>> {
    let mut installed = Vec::new();
    for file in unpack_tar_gz(archive)?.into_iter().filter(|f| select(&f.path)) {
        let target = format!("{}/{}", dest_dir, file.file_name());
        let mode = if file.mode & 0o111 != 0 { 0o755 } else { 0o644 };
        install_file(exec, &target, &file.contents, mode)
            .with_context(|| format!("Failed to install {}", target))?;
        installed.push(target);
    }
    if installed.is_empty() {
        anyhow::bail!("archive contained nothing to install into {}", dest_dir);
    }
    Ok(installed)
}

/// Installation phase
pub fn install(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    config: &ProvisioningConfig,
    host: &HostProfile,
    pkg_mgr: PackageManager,
) -> Result<PhaseResult> {
    let arch = host.arch;
    // Evaluated in order; the first failure stops the phase
    let outcomes = [
        (
            "containerd",
            containerd::ensure(exec, downloader, &config.containerd_version, arch, pkg_mgr)
                .map_err(|e| Error::installation("containerd", e))?,
        ),
        (
            "runc",
            runc::ensure(exec, downloader, &config.runc_version, arch)
                .map_err(|e| Error::installation("runc", e))?,
        ),
        (
            "CNI plugins",
            cni_plugins::ensure(exec, downloader, &config.cni_plugins_version, arch)
                .map_err(|e| Error::installation("CNI plugins", e))?,
        ),
        (
            "kubernetes",
            kubernetes::ensure(exec, downloader, &config.kubernetes_version, pkg_mgr)
                .map_err(|e| Error::installation("kubernetes", e))?,
        ),
    ];
    let installed: Vec<&str> = outcomes
        .iter()
        .filter(|(_, outcome)| *outcome == InstallOutcome::Installed)
        .map(|(component, _)| *component)
        .collect();

    if installed.is_empty() {
        return Ok(PhaseResult::skipped(
            "install",
            "containerd, runc, CNI plugins and Kubernetes tools already at the requested versions",
        ));
    }
    Ok(PhaseResult::succeeded(
        "install",
        format!("installed: {}", installed.join(", ")),
    ))
}
