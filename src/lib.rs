// Kubestrap Library
// Provisioning pipeline and host plumbing; the binary in main.rs is a thin CLI over it

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineReport};
