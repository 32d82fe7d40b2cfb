//! Environment detection

use super::{Arch, CgroupVersion, HostProfile, InitSystem};
use crate::config::paths;
use crate::error::{Error, Result};
use crate::pipeline::PhaseResult;
use crate::utils::exec::{CommandExecutor, run_checked, stdout_text};

const PROC1_COMM: &str = "/proc/1/comm";
const CGROUP_V2_CONTROLLERS: &str = "/sys/fs/cgroup/cgroup.controllers";
const SUPPORTED_DISTROS: &[&str] = &["ubuntu", "debian"];

/// Identify kernel, distribution, architecture, init system and cgroup layout
pub fn detect_host(exec: &dyn CommandExecutor) -> Result<HostProfile> {
    let kernel = stdout_text(&run_checked(exec, "uname", &["-s"])?);
    if kernel != "Linux" {
        return Err(Error::UnsupportedPlatform(format!(
            "kernel '{}' is not Linux",
            kernel
        )));
    }

    let machine = stdout_text(&run_checked(exec, "uname", &["-m"])?);
    let arch = Arch::from_machine(&machine).ok_or_else(|| {
        Error::UnsupportedPlatform(format!(
            "architecture '{}' is not supported (expected x86_64/amd64 or aarch64/arm64)",
            machine
        ))
    })?;

    let (distro_id, distro_version) = match exec.read_file(paths::OS_RELEASE) {
        Ok(content) => parse_os_release(&content),
        Err(e) => {
            tracing::warn!("Could not read {}: {:#}", paths::OS_RELEASE, e);
            (None, None)
        }
    };
    match distro_id.as_deref() {
        Some(id) if SUPPORTED_DISTROS.contains(&id) => {}
        other => tracing::warn!(
            "Distribution '{}' is not tested; continuing with apt-based installation",
            other.unwrap_or("unknown")
        ),
    }

    let init_system = match exec.read_file(PROC1_COMM) {
        Ok(comm) if comm.trim() == "systemd" => InitSystem::Systemd,
        _ => InitSystem::Other,
    };

    let cgroup_version = if exec.file_exists(CGROUP_V2_CONTROLLERS)? {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    };

    Ok(HostProfile::new(
        kernel,
        distro_id,
        distro_version,
        arch,
        init_system,
        cgroup_version,
    ))
}

/// Detection phase
pub fn run(exec: &dyn CommandExecutor) -> Result<(HostProfile, PhaseResult)> {
    let profile = detect_host(exec)?;
    tracing::info!("Detected host: {}", profile);
    if profile.init_system != InitSystem::Systemd {
        tracing::warn!("Init system is not systemd; service management steps may fail");
    }
    let result = PhaseResult::succeeded("detect", profile.to_string());
    Ok((profile, result))
}

/// `ID` and `VERSION_ID` from os-release content
pub fn parse_os_release(content: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut version = None;
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key {
            "ID" => id = Some(value.to_lowercase()),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }
    (id, version)
}
