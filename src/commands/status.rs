//! Read-only view of this node

use crate::config::paths;
use crate::error::Result;
use crate::services::host::detect::detect_host;
use crate::services::kubeadm::init::{self, ControlPlaneState};
use crate::services::kubeadm::join::{self, WorkerState};
use crate::services::runtime::containerd;
use crate::utils::exec::{CommandExecutor, stdout_text};
use crate::utils::LocalExecutor;

/// Tools reported by `status`, with the arguments that print their version
const TOOLS: &[(&str, &[&str])] = &[
    ("containerd", &["--version"]),
    ("runc", &["--version"]),
    ("kubeadm", &["version", "-o", "short"]),
    ("kubelet", &["--version"]),
    ("kubectl", &["version", "--client"]),
    ("cilium", &["version", "--client"]),
];

/// Bootstrap state as far as the local files tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    ControlPlane,
    Worker,
    NotBootstrapped,
}

pub fn handle_status() -> Result<()> {
    let exec = LocalExecutor;

    let profile = detect_host(&exec)?;
    println!("Host:          {}", profile);
    println!("Cgroup driver: {}", profile.cgroup_driver().as_str());
    println!();

    println!("Tools:");
    for (name, version) in tool_versions(&exec) {
        println!("  {:<11} {}", name, version.as_deref().unwrap_or("not installed"));
    }
    println!(
        "  {:<11} {}",
        "containerd",
        if containerd::is_active(&exec) { "active" } else { "not running" }
    );
    println!();

    match node_state(&exec)? {
        NodeState::ControlPlane => {
            println!("Node:          control plane ({})", paths::ADMIN_KUBECONFIG);
            if init::persisted_join_command(&exec).is_some() {
                println!("Join command:  {}", paths::JOIN_COMMAND_FILE);
            }
        }
        NodeState::Worker => println!("Node:          worker ({})", paths::KUBELET_KUBECONFIG),
        NodeState::NotBootstrapped => println!("Node:          not bootstrapped"),
    }
    Ok(())
}

/// First line of each tool's version output; None when the tool is absent
pub fn tool_versions(exec: &dyn CommandExecutor) -> Vec<(&'static str, Option<String>)> {
    TOOLS
        .iter()
        .map(|(name, args)| {
            let version = match exec.check_command_exists(name) {
                Ok(true) => exec
                    .execute_simple(name, args)
                    .ok()
                    .filter(|output| output.status.success())
                    .map(|output| {
                        stdout_text(&output)
                            .lines()
                            .next()
                            .unwrap_or_default()
                            .to_string()
                    }),
                _ => None,
            };
            (*name, version)
        })
        .collect()
}

pub fn node_state(exec: &dyn CommandExecutor) -> Result<NodeState> {
    if init::current_state(exec)? == ControlPlaneState::Initialized {
        return Ok(NodeState::ControlPlane);
    }
    if join::current_state(exec)? == WorkerState::Joined {
        return Ok(NodeState::Worker);
    }
    Ok(NodeState::NotBootstrapped)
}
