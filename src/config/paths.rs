//! Fixed on-disk locations read or written by the pipeline

pub const STATE_DIR: &str = "/etc/kubestrap";
pub const LOG_DIR: &str = "/var/log/kubestrap";
pub const DEFAULT_LOG_FILE: &str = "/var/log/kubestrap/kubestrap.log";
pub const LOCK_FILE: &str = "/run/kubestrap.lock";

pub const CONTAINERD_CONFIG: &str = "/etc/containerd/config.toml";
pub const CONTAINERD_UNIT: &str = "/etc/systemd/system/containerd.service";
pub const CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";
pub const CRICTL_CONFIG: &str = "/etc/crictl.yaml";
pub const RUNC_BINARY: &str = "/usr/local/sbin/runc";
pub const CNI_BIN_DIR: &str = "/opt/cni/bin";

pub const KUBELET_DROPIN_DIR: &str = "/etc/systemd/system/kubelet.service.d";
pub const KUBELET_DROPIN: &str = "/etc/systemd/system/kubelet.service.d/10-kubestrap.conf";
pub const KUBELET_DEFAULTS: &str = "/etc/default/kubelet";

pub const KUBEADM_CONFIG: &str = "/etc/kubestrap/kubeadm-config.yaml";
pub const JOIN_COMMAND_FILE: &str = "/etc/kubestrap/join-command.sh";
pub const KUBEADM_INIT_LOG: &str = "/var/log/kubestrap/kubeadm-init.log";
pub const KUBEADM_JOIN_LOG: &str = "/var/log/kubestrap/kubeadm-join.log";

pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
pub const KUBELET_KUBECONFIG: &str = "/etc/kubernetes/kubelet.conf";
pub const ROOT_KUBECONFIG: &str = "/root/.kube/config";

pub const FSTAB: &str = "/etc/fstab";
pub const OS_RELEASE: &str = "/etc/os-release";
pub const MODULES_LOAD: &str = "/etc/modules-load.d/kubestrap.conf";
pub const SYSCTL_CONF: &str = "/etc/sysctl.d/99-kubestrap.conf";

pub const APT_KEYRING_DIR: &str = "/etc/apt/keyrings";
pub const APT_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
pub const APT_SOURCE: &str = "/etc/apt/sources.list.d/kubernetes.list";

/// CRI socket URI handed to kubeadm, crictl and the kubelet
pub fn cri_socket_uri() -> String {
    format!("unix://{}", CONTAINERD_SOCKET)
}

/// Parent directory of an absolute path
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}
