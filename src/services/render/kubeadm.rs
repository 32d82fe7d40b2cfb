//! kubeadm bootstrap document (`/etc/kubestrap/kubeadm-config.yaml`)

use crate::config::{ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::services::host::HostProfile;
use yaml_rust::YamlLoader;

const EXPECTED_KINDS: &[&str] = &[
    "InitConfiguration",
    "ClusterConfiguration",
    "KubeletConfiguration",
];

/// `v1.30.4` for exact releases, `stable-1.30` for a minor line
fn kubernetes_version_label(config: &ProvisioningConfig) -> String {
    let version = &config.kubernetes_version;
    match version.patch {
        Some(_) => format!("v{}", version),
        None => format!("stable-{}", version.minor_line()),
    }
}

/// Render the InitConfiguration / ClusterConfiguration / KubeletConfiguration stream
pub fn render(config: &ProvisioningConfig, host: &HostProfile) -> Result<String> {
    let endpoint = config.api_server_address().ok_or_else(|| {
        Error::validation("a control-plane endpoint is required to render the kubeadm config")
    })?;
    let token = config
        .bootstrap_token
        .as_ref()
        .ok_or_else(|| Error::validation("a bootstrap token is required to render the kubeadm config"))?;

    let document = format!(
        r#"# Managed by kubestrap
apiVersion: kubeadm.k8s.io/v1beta3
kind: InitConfiguration
bootstrapTokens:
  - token: "{token}"
    ttl: "{ttl}"
    groups:
      - system:bootstrappers:kubeadm:default-node-token
    usages:
      - signing
      - authentication
nodeRegistration:
  criSocket: "{socket}"
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
kubernetesVersion: "{version}"
controlPlaneEndpoint: "{endpoint}"
networking:
  podSubnet: "{pods}"
  serviceSubnet: "{services}"
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
cgroupDriver: {driver}
"#,
        token = token.as_str(),
        ttl = config.token_ttl,
        socket = paths::cri_socket_uri(),
        version = kubernetes_version_label(config),
        endpoint = endpoint,
        pods = config.pod_network_cidr,
        services = config.service_cidr,
        driver = host.cgroup_driver(),
    );

    validate(&document)?;
    Ok(document)
}

/// Parse the stream back and check it holds the three expected documents
fn validate(document: &str) -> Result<()> {
    let docs = YamlLoader::load_from_str(document).map_err(|e| {
        Error::config_write(paths::KUBEADM_CONFIG, format!("rendered YAML does not parse: {}", e))
    })?;
    let kinds: Vec<&str> = docs.iter().filter_map(|d| d["kind"].as_str()).collect();
    if kinds != EXPECTED_KINDS {
        return Err(Error::config_write(
            paths::KUBEADM_CONFIG,
            format!("unexpected document kinds: {:?}", kinds),
        ));
    }
    Ok(())
}
