//! `/etc/containerd/config.toml`

use crate::config::paths;
use crate::error::Result;
use crate::services::host::CgroupDriver;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SANDBOX_IMAGE: &str = "registry.k8s.io/pause:3.9";
const CNI_CONF_DIR: &str = "/etc/cni/net.d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerdConfig {
    pub version: u32,
    pub plugins: Plugins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugins {
    #[serde(rename = "io.containerd.grpc.v1.cri")]
    pub cri: CriPlugin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriPlugin {
    pub sandbox_image: String,
    pub containerd: CriContainerd,
    pub cni: CniSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriContainerd {
    pub default_runtime_name: String,
    pub runtimes: BTreeMap<String, Runtime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub runtime_type: String,
    pub options: RuncOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuncOptions {
    #[serde(rename = "SystemdCgroup")]
    pub systemd_cgroup: bool,
    #[serde(rename = "BinaryName")]
    pub binary_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CniSettings {
    pub bin_dir: String,
    pub conf_dir: String,
}

impl ContainerdConfig {
    pub fn for_driver(driver: CgroupDriver) -> Self {
        let mut runtimes = BTreeMap::new();
        runtimes.insert(
            "runc".to_string(),
            Runtime {
                runtime_type: "io.containerd.runc.v2".to_string(),
                options: RuncOptions {
                    systemd_cgroup: driver.uses_systemd(),
                    binary_name: paths::RUNC_BINARY.to_string(),
                },
            },
        );

        ContainerdConfig {
            version: 2,
            plugins: Plugins {
                cri: CriPlugin {
                    sandbox_image: SANDBOX_IMAGE.to_string(),
                    containerd: CriContainerd {
                        default_runtime_name: "runc".to_string(),
                        runtimes,
                    },
                    cni: CniSettings {
                        bin_dir: paths::CNI_BIN_DIR.to_string(),
                        conf_dir: CNI_CONF_DIR.to_string(),
                    },
                },
            },
        }
    }
}

pub fn render(driver: CgroupDriver) -> Result<String> {
    let body = toml::to_string(&ContainerdConfig::for_driver(driver))
        .context("Failed to serialize containerd config")?;
    Ok(format!("# Managed by kubestrap\n{}", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemd_cgroup_follows_driver() {
        for (driver, expected) in [(CgroupDriver::Systemd, true), (CgroupDriver::Cgroupfs, false)] {
            let rendered = render(driver).unwrap();
            let parsed: ContainerdConfig = toml::from_str(&rendered).unwrap();
            assert_eq!(parsed.version, 2);
            assert_eq!(
                parsed.plugins.cri.containerd.runtimes["runc"].options.systemd_cgroup,
                expected
            );
        }
    }

    #[test]
    fn test_rendered_keys_match_containerd_schema() {
        let rendered = render(CgroupDriver::Systemd).unwrap();
        assert!(rendered.contains("io.containerd.grpc.v1.cri"));
        assert!(rendered.contains("SystemdCgroup = true"));
        assert!(rendered.contains("BinaryName = \"/usr/local/sbin/runc\""));
        assert!(rendered.contains("sandbox_image = \"registry.k8s.io/pause:3.9\""));
    }
}
