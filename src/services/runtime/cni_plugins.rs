//! CNI reference plugins into `/opt/cni/bin`

use super::{InstallOutcome, install_from_tarball};
use crate::config::{Version, paths};
use crate::services::host::Arch;
use crate::utils::Downloader;
use crate::utils::download::verify_sha256;
use crate::utils::exec::CommandExecutor;
use anyhow::{Context, Result};

/// Records which release is unpacked in `/opt/cni/bin`
fn marker_path() -> String {
    format!("{}/.kubestrap-version", paths::CNI_BIN_DIR)
}

pub fn release_url(version: &Version, arch: Arch) -> String {
    format!(
        "https://github.com/containernetworking/plugins/releases/download/v{v}/cni-plugins-linux-{arch}-v{v}.tgz",
        v = version,
        arch = arch.as_str()
    )
}

pub fn installed(exec: &dyn CommandExecutor, version: &Version) -> bool {
    exec.read_file(&marker_path())
        .map(|marker| marker.trim() == version.to_string())
        .unwrap_or(false)
}

pub fn ensure(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
    version: &Version,
    arch: Arch,
) -> Result<InstallOutcome> {
    if installed(exec, version) {
        tracing::info!("✓ CNI plugins {} are already installed", version);
        return Ok(InstallOutcome::AlreadyPresent);
    }

    tracing::info!("Installing CNI plugins {}...", version);
    let url = release_url(version, arch);
    let archive = downloader.fetch(&url)?;
    let checksum = downloader.fetch(&format!("{}.sha256", url))?;
    verify_sha256(&archive, &String::from_utf8_lossy(&checksum))
        .with_context(|| format!("Verification of {} failed", url))?;

    let plugins = install_from_tarball(exec, &archive, paths::CNI_BIN_DIR, |_| true)?;
    exec.write_file(&marker_path(), format!("{}\n", version).as_bytes())?;

    crate::success!("{} CNI plugins {} installed", plugins.len(), version);
    Ok(InstallOutcome::Installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::download::{build_tar_gz, sha256_hex};
    use crate::utils::testing::{FakeDownloader, FakeHost};

    #[test]
    fn test_install_then_skip() {
        let version: Version = "1.5.1".parse().unwrap();
        let archive = build_tar_gz(&[("./bridge", b"a", 0o755), ("./loopback", b"b", 0o755)]);
        let url = release_url(&version, Arch::Amd64);
        let dl = FakeDownloader::new()
            .serve(&url, &archive)
            .serve(&format!("{}.sha256", url), sha256_hex(&archive).as_bytes());
        let host = FakeHost::ubuntu();

        assert_eq!(ensure(&host, &dl, &version, Arch::Amd64).unwrap(), InstallOutcome::Installed);
        assert!(host.file("/opt/cni/bin/bridge").is_some());
        assert!(host.file("/opt/cni/bin/loopback").is_some());
        assert_eq!(
            ensure(&host, &dl, &version, Arch::Amd64).unwrap(),
            InstallOutcome::AlreadyPresent
        );
        assert_eq!(dl.fetched().len(), 2);
    }
}
