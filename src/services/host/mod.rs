//! Host facts and host-level preparation

pub mod detect;
pub mod prepare;
pub mod preflight;

use std::fmt;

/// CPU architecture, normalized to the names release artifacts use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Normalize `uname -m` output
    pub fn from_machine(machine: &str) -> Option<Self> {
        match machine.trim() {
            "x86_64" | "amd64" => Some(Arch::Amd64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// How the kubelet and containerd manage cgroups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupDriver {
    Systemd,
    Cgroupfs,
}

impl CgroupDriver {
    /// `systemd` unless the host runs another init on cgroup v1
    pub fn derive(init: InitSystem, cgroup: CgroupVersion) -> Self {
        match (init, cgroup) {
            (InitSystem::Other, CgroupVersion::V1) => CgroupDriver::Cgroupfs,
            _ => CgroupDriver::Systemd,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CgroupDriver::Systemd => "systemd",
            CgroupDriver::Cgroupfs => "cgroupfs",
        }
    }

    pub fn uses_systemd(&self) -> bool {
        matches!(self, CgroupDriver::Systemd)
    }
}

impl fmt::Display for CgroupDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the host, gathered once by [`detect::detect_host`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    pub kernel: String,
    pub distro_id: Option<String>,
    pub distro_version: Option<String>,
    pub arch: Arch,
    pub init_system: InitSystem,
    pub cgroup_version: CgroupVersion,
    cgroup_driver: CgroupDriver,
}

impl HostProfile {
    pub fn new(
        kernel: String,
        distro_id: Option<String>,
        distro_version: Option<String>,
        arch: Arch,
        init_system: InitSystem,
        cgroup_version: CgroupVersion,
    ) -> Self {
        HostProfile {
            kernel,
            distro_id,
            distro_version,
            arch,
            init_system,
            cgroup_version,
            cgroup_driver: CgroupDriver::derive(init_system, cgroup_version),
        }
    }

    pub fn cgroup_driver(&self) -> CgroupDriver {
        self.cgroup_driver
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{}, init={}, cgroup={}, driver={}",
            self.distro_id.as_deref().unwrap_or("unknown"),
            self.distro_version.as_deref().unwrap_or("?"),
            self.kernel.to_lowercase(),
            self.arch.as_str(),
            match self.init_system {
                InitSystem::Systemd => "systemd",
                InitSystem::Other => "other",
            },
            match self.cgroup_version {
                CgroupVersion::V1 => "v1",
                CgroupVersion::V2 => "v2",
            },
            self.cgroup_driver
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgroup_driver_table() {
        let cases = [
            (InitSystem::Systemd, CgroupVersion::V1, CgroupDriver::Systemd),
            (InitSystem::Systemd, CgroupVersion::V2, CgroupDriver::Systemd),
            (InitSystem::Other, CgroupVersion::V2, CgroupDriver::Systemd),
            (InitSystem::Other, CgroupVersion::V1, CgroupDriver::Cgroupfs),
        ];
        for (init, cgroup, expected) in cases {
            assert_eq!(CgroupDriver::derive(init, cgroup), expected, "{:?}/{:?}", init, cgroup);
        }
    }

    #[test]
    fn test_arch_normalization() {
        assert_eq!(Arch::from_machine("x86_64\n"), Some(Arch::Amd64));
        assert_eq!(Arch::from_machine("aarch64"), Some(Arch::Arm64));
        assert_eq!(Arch::from_machine("riscv64"), None);
    }

    #[test]
    fn test_profile_driver_is_derived_once() {
        let profile = HostProfile::new(
            "Linux".to_string(),
            Some("debian".to_string()),
            Some("12".to_string()),
            Arch::Arm64,
            InitSystem::Other,
            CgroupVersion::V1,
        );
        assert_eq!(profile.cgroup_driver(), CgroupDriver::Cgroupfs);
        assert!(profile.to_string().contains("driver=cgroupfs"));
    }
}
