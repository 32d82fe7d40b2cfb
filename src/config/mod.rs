//! Provisioning configuration
//!
//! [`ProvisionArgs`] is what the operator typed (flags, `KUBESTRAP_*` environment
//! variables, `.env`). [`ProvisioningConfig::from_args`] validates it once and
//! produces the immutable configuration every phase borrows. Nothing here touches
//! the host, so a bad invocation fails before any mutation.

pub mod network;
pub mod paths;

use crate::error::{Error, Result};
use crate::logging::LogLevel;
use clap::{Args, ValueEnum};
use rand::Rng;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use network::{Cidr, Endpoint};

pub const DEFAULT_KUBERNETES_VERSION: &str = "1.30.4";
pub const DEFAULT_CONTAINERD_VERSION: &str = "1.7.22";
pub const DEFAULT_RUNC_VERSION: &str = "1.1.14";
pub const DEFAULT_CNI_PLUGINS_VERSION: &str = "1.5.1";
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
pub const DEFAULT_CONTROL_PLANE_PORT: u16 = 6443;
pub const DEFAULT_TOKEN_TTL: &str = "24h0m0s";

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NodeRole {
    #[value(name = "control-plane")]
    ControlPlane,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Supported pod network providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniProvider {
    Cilium,
    Calico,
    Flannel,
}

impl CniProvider {
    pub fn name(&self) -> &'static str {
        match self {
            CniProvider::Cilium => "cilium",
            CniProvider::Calico => "calico",
            CniProvider::Flannel => "flannel",
        }
    }

    pub fn default_version(&self) -> &'static str {
        match self {
            CniProvider::Cilium => "1.16.3",
            CniProvider::Calico => "3.28.2",
            CniProvider::Flannel => "0.25.7",
        }
    }

    /// Pod CIDR the provider uses when nothing is overridden
    pub fn default_pod_cidr(&self) -> &'static str {
        match self {
            CniProvider::Cilium => "10.217.0.0/16",
            CniProvider::Calico => "192.168.0.0/16",
            CniProvider::Flannel => "10.244.0.0/16",
        }
    }
}

impl FromStr for CniProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cilium" => Ok(CniProvider::Cilium),
            "calico" => Ok(CniProvider::Calico),
            "flannel" => Ok(CniProvider::Flannel),
            _ => Err(Error::UnsupportedCniProvider(s.trim().to_string())),
        }
    }
}

impl fmt::Display for CniProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dotted release version (`1.30`, `1.30.4`, `v1.7.22`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    /// Parse a version that must name an exact release (`x.y.z`)
    pub fn parse_exact(what: &str, s: &str) -> Result<Self> {
        let version: Version = s.parse()?;
        if version.patch.is_none() {
            return Err(Error::validation(format!(
                "{} version '{}' must be a full release (x.y.z)",
                what, s
            )));
        }
        Ok(version)
    }

    /// `1.30` for both `1.30` and `1.30.4`
    pub fn minor_line(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// True when `reported` (e.g. `v1.30.4` or `runc version 1.1.14`) satisfies this version
    pub fn matches(&self, reported: &str) -> bool {
        let Some(found) = extract_version(reported) else {
            return false;
        };
        found.major == self.major
            && found.minor == self.minor
            && (self.patch.is_none() || found.patch == self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = digits.split('.').collect();
        let parse = |p: &str| p.parse::<u32>().ok();
        match parts.as_slice() {
            [major, minor] => Ok(Version {
                major: parse(major).ok_or_else(|| bad_version(s))?,
                minor: parse(minor).ok_or_else(|| bad_version(s))?,
                patch: None,
            }),
            [major, minor, patch] => Ok(Version {
                major: parse(major).ok_or_else(|| bad_version(s))?,
                minor: parse(minor).ok_or_else(|| bad_version(s))?,
                patch: Some(parse(patch).ok_or_else(|| bad_version(s))?),
            }),
            _ => Err(bad_version(s)),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

fn bad_version(s: &str) -> Error {
    Error::validation(format!("'{}' is not a valid version (expected x.y or x.y.z)", s))
}

/// Pull the first `x.y.z` out of a tool's `--version` output
pub fn extract_version(output: &str) -> Option<Version> {
    let re = Regex::new(r"v?(\d+)\.(\d+)\.(\d+)").ok()?;
    let caps = re.captures(output)?;
    Some(Version {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        patch: Some(caps[3].parse().ok()?),
    })
}

/// kubeadm bootstrap token (`abcdef.0123456789abcdef`)
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken(String);

impl BootstrapToken {
    /// Generate a random token in kubeadm's format
    pub fn generate() -> Self {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let mut pick = |n: usize| -> String {
            (0..n)
                .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                .collect()
        };
        let id = pick(6);
        let secret = pick(16);
        BootstrapToken(format!("{}.{}", id, secret))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// kubeadm only accepts `[a-z0-9]{6}.[a-z0-9]{16}` for tokens it creates
    pub fn is_kubeadm_format(&self) -> bool {
        match self.0.split_once('.') {
            Some((id, secret)) => id.len() == 6 && secret.len() == 16,
            None => false,
        }
    }
}

impl FromStr for BootstrapToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let re = Regex::new(r"^[a-z0-9]+\.[a-z0-9]+$").map_err(anyhow::Error::from)?;
        if !re.is_match(s) {
            return Err(Error::validation(
                "bootstrap token must look like <id>.<secret> (lowercase letters and digits)",
            ));
        }
        Ok(BootstrapToken(s.to_string()))
    }
}

// Tokens are secrets; only the public id half is ever printed
impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.split('.').next().unwrap_or_default();
        write!(f, "BootstrapToken({}.****************)", id)
    }
}

/// How a worker learns to reach the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSource {
    Token(BootstrapToken),
    Command(String),
}

/// Flags accepted by the provisioning command
///
/// Every value is optional at the parser level so that missing or conflicting
/// values surface as typed validation errors instead of usage errors.
#[derive(Args, Debug, Clone, Default)]
pub struct ProvisionArgs {
    /// Node role
    #[arg(long, value_enum, env = "KUBESTRAP_NODE_TYPE")]
    pub node_type: Option<NodeRole>,

    /// Kubernetes version, x.y or x.y.z [default: 1.30.4]
    #[arg(long, env = "KUBESTRAP_K8S_VERSION")]
    pub k8s_version: Option<String>,

    /// containerd release [default: 1.7.22]
    #[arg(long, env = "KUBESTRAP_CONTAINER_RUNTIME_VERSION")]
    pub container_runtime_version: Option<String>,

    /// runc release [default: 1.1.14]
    #[arg(long, env = "KUBESTRAP_RUNC_VERSION")]
    pub runc_version: Option<String>,

    /// CNI reference plugins release [default: 1.5.1]
    #[arg(long, env = "KUBESTRAP_CNI_PLUGINS_VERSION")]
    pub cni_plugins_version: Option<String>,

    /// Pod network provider: cilium, calico or flannel [default: cilium]
    #[arg(long, env = "KUBESTRAP_CNI_PROVIDER")]
    pub cni_provider: Option<String>,

    /// Pod network provider release [default depends on provider]
    #[arg(long, env = "KUBESTRAP_CNI_VERSION")]
    pub cni_version: Option<String>,

    /// Pod network CIDR [default: provider's default]
    #[arg(long, env = "KUBESTRAP_POD_NETWORK_CIDR")]
    pub pod_network_cidr: Option<String>,

    /// Service CIDR [default: 10.96.0.0/12]
    #[arg(long, env = "KUBESTRAP_SERVICE_CIDR")]
    pub service_cidr: Option<String>,

    /// Control-plane endpoint, host[:port] (required for control-plane)
    #[arg(long, env = "KUBESTRAP_CONTROL_PLANE_ENDPOINT")]
    pub control_plane_endpoint: Option<String>,

    /// API server port when the endpoint has none [default: 6443]
    #[arg(long, env = "KUBESTRAP_CONTROL_PLANE_PORT")]
    pub control_plane_port: Option<u16>,

    /// Full join command printed by the control plane (worker)
    #[arg(long, env = "KUBESTRAP_JOIN_COMMAND")]
    pub join_command: Option<String>,

    /// Bootstrap token (worker: join with it; control-plane: use instead of generating one)
    #[arg(long, env = "KUBESTRAP_TOKEN")]
    pub token: Option<String>,

    /// Bootstrap token lifetime [default: 24h0m0s]
    #[arg(long, env = "KUBESTRAP_TOKEN_TTL")]
    pub token_ttl: Option<String>,

    /// Do not install a pod network
    #[arg(long, env = "KUBESTRAP_SKIP_CNI")]
    pub skip_cni: bool,

    /// Reset an existing installation before init/join
    #[arg(long, env = "KUBESTRAP_FORCE_RESET")]
    pub force_reset: bool,

    /// Minimum log level [default: info]
    #[arg(long, value_enum, env = "KUBESTRAP_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log file [default: /var/log/kubestrap/kubestrap.log]
    #[arg(long, env = "KUBESTRAP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Shorthand for --log-level debug
    #[arg(short = 'v', long, visible_alias = "debug")]
    pub verbose: bool,
}

impl ProvisionArgs {
    /// Effective log level before the rest of the arguments are validated
    pub fn effective_log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level.unwrap_or_default()
        }
    }

    pub fn effective_log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(paths::DEFAULT_LOG_FILE))
    }
}

/// Validated, immutable configuration shared by every phase
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub role: NodeRole,
    pub kubernetes_version: Version,
    pub containerd_version: Version,
    pub runc_version: Version,
    pub cni_plugins_version: Version,
    pub cni: CniProvider,
    pub cni_version: Version,
    pub pod_network_cidr: Cidr,
    pub service_cidr: Cidr,
    pub control_plane_endpoint: Option<Endpoint>,
    pub control_plane_port: u16,
    pub bootstrap_token: Option<BootstrapToken>,
    pub token_ttl: String,
    pub skip_cni: bool,
    pub force_reset: bool,
    pub join: Option<JoinSource>,
    pub invoking_user: Option<String>,
    pub log_level: LogLevel,
    pub log_file: PathBuf,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    pub cni_wait_timeout: Duration,
}

impl ProvisioningConfig {
    /// Validate operator input. `invoking_user` is the account that elevated
    /// privileges (if any); the caller reads it from the environment.
    pub fn from_args(args: &ProvisionArgs, invoking_user: Option<String>) -> Result<Self> {
        let role = args.node_type.ok_or_else(|| {
            Error::validation("--node-type is required (control-plane or worker)")
        })?;

        let cni: CniProvider = args.cni_provider.as_deref().unwrap_or("cilium").parse()?;

        let kubernetes_version: Version = args
            .k8s_version
            .as_deref()
            .unwrap_or(DEFAULT_KUBERNETES_VERSION)
            .parse()?;
        let containerd_version = Version::parse_exact(
            "container runtime",
            args.container_runtime_version
                .as_deref()
                .unwrap_or(DEFAULT_CONTAINERD_VERSION),
        )?;
        let runc_version = Version::parse_exact(
            "runc",
            args.runc_version.as_deref().unwrap_or(DEFAULT_RUNC_VERSION),
        )?;
        let cni_plugins_version = Version::parse_exact(
            "CNI plugins",
            args.cni_plugins_version
                .as_deref()
                .unwrap_or(DEFAULT_CNI_PLUGINS_VERSION),
        )?;
        let cni_version = Version::parse_exact(
            cni.name(),
            args.cni_version.as_deref().unwrap_or(cni.default_version()),
        )?;

        let pod_network_cidr: Cidr = args
            .pod_network_cidr
            .as_deref()
            .unwrap_or(cni.default_pod_cidr())
            .parse()?;
        let service_cidr: Cidr = args
            .service_cidr
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_CIDR)
            .parse()?;
        if pod_network_cidr.overlaps(&service_cidr) {
            return Err(Error::validation(format!(
                "pod network CIDR {} overlaps service CIDR {}",
                pod_network_cidr, service_cidr
            )));
        }

        let control_plane_endpoint = args
            .control_plane_endpoint
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Endpoint>)
            .transpose()?;
        let control_plane_port = args
            .control_plane_port
            .unwrap_or(DEFAULT_CONTROL_PLANE_PORT);
        if control_plane_port == 0 {
            return Err(Error::validation("--control-plane-port cannot be 0"));
        }

        let token = args
            .token
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<BootstrapToken>)
            .transpose()?;

        let token_ttl = args
            .token_ttl
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_TTL.to_string());
        validate_ttl(&token_ttl)?;

        let join_command = args
            .join_command
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let (bootstrap_token, join) = match role {
            NodeRole::ControlPlane => {
                if control_plane_endpoint.is_none() {
                    return Err(Error::validation(
                        "--control-plane-endpoint is required for a control-plane node",
                    ));
                }
                if join_command.is_some() {
                    tracing::warn!("--join-command is ignored on a control-plane node");
                }
                if let Some(ref token) = token {
                    if !token.is_kubeadm_format() {
                        return Err(Error::validation(
                            "a control-plane bootstrap token must match [a-z0-9]{6}.[a-z0-9]{16}",
                        ));
                    }
                }
                (Some(token.unwrap_or_else(BootstrapToken::generate)), None)
            }
            NodeRole::Worker => {
                let join = match (token, join_command) {
                    (Some(token), command) => {
                        if control_plane_endpoint.is_none() {
                            return Err(Error::validation(
                                "--token requires --control-plane-endpoint on a worker node",
                            ));
                        }
                        if command.is_some() {
                            tracing::warn!("Both --token and --join-command given; using --token");
                        }
                        JoinSource::Token(token)
                    }
                    (None, Some(command)) => JoinSource::Command(command),
                    (None, None) => {
                        return Err(Error::validation(
                            "a worker node needs --join-command or --token",
                        ));
                    }
                };
                (None, Some(join))
            }
        };

        Ok(ProvisioningConfig {
            role,
            kubernetes_version,
            containerd_version,
            runc_version,
            cni_plugins_version,
            cni,
            cni_version,
            pod_network_cidr,
            service_cidr,
            control_plane_endpoint,
            control_plane_port,
            bootstrap_token,
            token_ttl,
            skip_cni: args.skip_cni,
            force_reset: args.force_reset,
            join,
            invoking_user: invoking_user.filter(|u| !u.is_empty() && u != "root"),
            log_level: args.effective_log_level(),
            log_file: args.effective_log_file(),
            readiness_timeout: Duration::from_secs(60),
            readiness_interval: Duration::from_secs(1),
            cni_wait_timeout: Duration::from_secs(300),
        })
    }

    /// `host:port` of the API server
    pub fn api_server_address(&self) -> Option<String> {
        self.control_plane_endpoint
            .as_ref()
            .map(|ep| ep.address(self.control_plane_port))
    }
}

fn validate_ttl(ttl: &str) -> Result<()> {
    let re = Regex::new(r"^(0|(\d+h)?(\d+m)?(\d+(\.\d+)?s)?)$").map_err(anyhow::Error::from)?;
    if ttl.is_empty() || !re.is_match(ttl) {
        return Err(Error::validation(format!(
            "token TTL '{}' is not a duration like 24h0m0s",
            ttl
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_plane_args() -> ProvisionArgs {
        ProvisionArgs {
            node_type: Some(NodeRole::ControlPlane),
            control_plane_endpoint: Some("cp.example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_control_plane_defaults() {
        let config = ProvisioningConfig::from_args(&control_plane_args(), None).unwrap();
        assert_eq!(config.cni, CniProvider::Cilium);
        assert_eq!(config.pod_network_cidr.to_string(), "10.217.0.0/16");
        assert_eq!(config.api_server_address().unwrap(), "cp.example.com:6443");
        assert!(config.bootstrap_token.is_some());
        assert!(config.join.is_none());
    }

    #[test]
    fn test_control_plane_requires_endpoint() {
        let args = ProvisionArgs {
            control_plane_endpoint: None,
            ..control_plane_args()
        };
        let err = ProvisioningConfig::from_args(&args, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_role_is_validation_error() {
        let err = ProvisioningConfig::from_args(&ProvisionArgs::default(), None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_worker_without_join_info_fails() {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::Worker),
            ..Default::default()
        };
        let err = ProvisioningConfig::from_args(&args, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_worker_token_requires_endpoint() {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::Worker),
            token: Some("abcde1.0123456789abcdef".to_string()),
            ..Default::default()
        };
        assert!(ProvisioningConfig::from_args(&args, None).is_err());
    }

    #[test]
    fn test_worker_token_wins_over_command() {
        let args = ProvisionArgs {
            node_type: Some(NodeRole::Worker),
            token: Some("abcde1.0123456789abcdef".to_string()),
            join_command: Some("kubeadm join x:6443 --token y".to_string()),
            control_plane_endpoint: Some("cp.example.com:6443".to_string()),
            ..Default::default()
        };
        let config = ProvisioningConfig::from_args(&args, None).unwrap();
        assert!(matches!(config.join, Some(JoinSource::Token(_))));
    }

    #[test]
    fn test_unsupported_cni_provider() {
        let args = ProvisionArgs {
            cni_provider: Some("weave".to_string()),
            ..control_plane_args()
        };
        let err = ProvisioningConfig::from_args(&args, None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCniProvider(ref p) if p == "weave"));
    }

    #[test]
    fn test_provider_default_cidr_follows_provider() {
        let args = ProvisionArgs {
            cni_provider: Some("Flannel".to_string()),
            ..control_plane_args()
        };
        let config = ProvisioningConfig::from_args(&args, None).unwrap();
        assert_eq!(config.cni, CniProvider::Flannel);
        assert_eq!(config.pod_network_cidr.to_string(), "10.244.0.0/16");
    }

    #[test]
    fn test_overlapping_cidrs_rejected() {
        let args = ProvisionArgs {
            pod_network_cidr: Some("10.96.0.0/16".to_string()),
            ..control_plane_args()
        };
        let err = ProvisioningConfig::from_args(&args, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_bad_token_and_ttl_rejected() {
        let args = ProvisionArgs {
            token: Some("not-a-token".to_string()),
            ..control_plane_args()
        };
        assert!(ProvisioningConfig::from_args(&args, None).is_err());

        let args = ProvisionArgs {
            token: Some("abcde.0123456789abcdef".to_string()),
            ..control_plane_args()
        };
        assert!(ProvisioningConfig::from_args(&args, None).is_err());

        let args = ProvisionArgs {
            token_ttl: Some("one day".to_string()),
            ..control_plane_args()
        };
        assert!(ProvisioningConfig::from_args(&args, None).is_err());
    }

    #[test]
    fn test_generated_token_format() {
        let token = BootstrapToken::generate();
        assert!(token.is_kubeadm_format());
        assert!(token.as_str().parse::<BootstrapToken>().is_ok());
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }

    #[test]
    fn test_version_matching() {
        let v: Version = "1.30.4".parse().unwrap();
        assert!(v.matches("v1.30.4"));
        assert!(!v.matches("v1.30.3"));

        let minor: Version = "v1.30".parse().unwrap();
        assert!(minor.matches("Kubernetes v1.30.9"));
        assert!(!minor.matches("not installed"));

        assert!(Version::parse_exact("runc", "1.1").is_err());
    }

    #[test]
    fn test_root_is_not_an_invoking_user() {
        let config =
            ProvisioningConfig::from_args(&control_plane_args(), Some("root".to_string())).unwrap();
        assert!(config.invoking_user.is_none());

        let config =
            ProvisioningConfig::from_args(&control_plane_args(), Some("alice".to_string())).unwrap();
        assert_eq!(config.invoking_user.as_deref(), Some("alice"));
    }
}
