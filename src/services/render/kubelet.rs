//! kubelet systemd drop-in and `/etc/default/kubelet`

use crate::config::paths;
use crate::services::host::CgroupDriver;

/// Orders the kubelet after containerd
pub fn render_dropin() -> String {
    format!(
        "# Managed by kubestrap\n\
         [Unit]\n\
         After=containerd.service\n\
         Wants=containerd.service\n\
         \n\
         [Service]\n\
         EnvironmentFile=-{}\n",
        paths::KUBELET_DEFAULTS
    )
}

/// Extra kubelet flags picked up by the kubeadm drop-in
pub fn render_defaults(driver: CgroupDriver) -> String {
    format!(
        "KUBELET_EXTRA_ARGS=\"--container-runtime-endpoint={} --cgroup-driver={}\"\n",
        paths::cri_socket_uri(),
        driver
    )
}
