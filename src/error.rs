//! Fatal error taxonomy for the provisioning pipeline
//!
//! Executor plumbing reports `anyhow` errors; each phase classifies what went
//! wrong into one of these variants so the CLI can print which step failed.

use std::time::Duration;
use thiserror::Error;

/// Errors that abort the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to install {component}: {reason}")]
    Installation { component: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    ConfigWrite { path: String, reason: String },

    #[error("kubeadm init failed: {0}")]
    ClusterInit(String),

    #[error("kubeadm join failed: {0}")]
    ClusterJoin(String),

    #[error("Unsupported CNI provider '{0}' (expected one of: cilium, calico, flannel)")]
    UnsupportedCniProvider(String),

    #[error("Control plane did not become ready within {}s", .0.as_secs())]
    ReadinessTimeout(Duration),

    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn installation(component: &str, reason: impl std::fmt::Display) -> Self {
        Error::Installation {
            component: component.to_string(),
            reason: format!("{:#}", reason),
        }
    }

    pub fn config_write(path: &str, reason: impl std::fmt::Display) -> Self {
        Error::ConfigWrite {
            path: path.to_string(),
            reason: format!("{:#}", reason),
        }
    }
}
