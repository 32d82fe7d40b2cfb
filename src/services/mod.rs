// Provisioning phases, in pipeline order: host → runtime → render → kubeadm → cni → verify
pub mod cni;
pub mod host;
pub mod kubeadm;
pub mod render;
pub mod runtime;
pub mod verify;
