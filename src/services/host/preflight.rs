//! External preconditions checked before the host is touched

use crate::error::{Error, Result};
use crate::pipeline::PhaseResult;
use crate::utils::{CommandExecutor, Downloader, PackageManager};
use anyhow::Context;

/// Endpoints every installation step depends on
const REQUIRED_ENDPOINTS: &[&str] = &["https://pkgs.k8s.io", "https://github.com"];

pub fn require_root(exec: &dyn CommandExecutor) -> Result<()> {
    let user = exec.get_username()?;
    if user != "root" {
        return Err(Error::validation(format!(
            "kubestrap must run as root (running as '{}'); re-run with sudo",
            user
        )));
    }
    Ok(())
}

pub fn require_package_manager(exec: &dyn CommandExecutor) -> Result<PackageManager> {
    let pkg_mgr = PackageManager::detect(exec)?;
    if !pkg_mgr.is_supported() {
        return Err(Error::UnsupportedPlatform(format!(
            "package manager '{}' is not supported; an apt-based distribution is required",
            pkg_mgr.display_name()
        )));
    }
    Ok(pkg_mgr)
}

pub fn require_network(downloader: &dyn Downloader) -> Result<()> {
    for url in REQUIRED_ENDPOINTS {
        downloader
            .probe(url)
            .with_context(|| format!("Network check failed; {} must be reachable", url))?;
    }
    Ok(())
}

/// Preflight phase: root, package manager, network
pub fn run(
    exec: &dyn CommandExecutor,
    downloader: &dyn Downloader,
) -> Result<(PackageManager, PhaseResult)> {
    require_root(exec)?;
    let pkg_mgr = require_package_manager(exec)?;
    require_network(downloader)?;
    tracing::info!("Preflight checks passed ({})", pkg_mgr.display_name());
    Ok((
        pkg_mgr,
        PhaseResult::succeeded("preflight", "root, apt and network available"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{FakeDownloader, FakeHost};

    #[test]
    fn test_preflight_passes_on_ubuntu() {
        let host = FakeHost::ubuntu();
        let (pkg_mgr, result) = run(&host, &FakeDownloader::new()).unwrap();
        assert_eq!(pkg_mgr, PackageManager::Apt);
        assert_eq!(result.phase, "preflight");
    }

    #[test]
    fn test_non_root_is_rejected() {
        let host = FakeHost::ubuntu().with_user("alice");
        let err = run(&host, &FakeDownloader::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("root")));
    }

    #[test]
    fn test_missing_apt_is_unsupported() {
        let host = FakeHost::new().with_command("dnf");
        let err = run(&host, &FakeDownloader::new()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_offline_host_fails() {
        let host = FakeHost::ubuntu();
        let err = run(&host, &FakeDownloader::offline()).unwrap_err();
        assert!(err.to_string().contains("Network check failed"));
    }
}
