//! Host preparation: swap, kernel modules, sysctls, port checks

use crate::config::{NodeRole, ProvisioningConfig, paths};
use crate::error::Result;
use crate::pipeline::PhaseResult;
use crate::services::render::write_artifact;
use crate::utils::exec::{CommandExecutor, run_best_effort, stdout_text};

const KERNEL_MODULES: &[&str] = &["overlay", "br_netfilter"];

const SYSCTLS: &[(&str, &str)] = &[
    ("net.bridge.bridge-nf-call-iptables", "1"),
    ("net.bridge.bridge-nf-call-ip6tables", "1"),
    ("net.ipv4.ip_forward", "1"),
];

const CONTROL_PLANE_PORTS: &[u16] = &[6443, 2379, 2380, 10250, 10259, 10257];
const WORKER_PORTS: &[u16] = &[10250];

/// Ports a node of `role` needs free
pub fn required_ports(role: NodeRole) -> &'static [u16] {
    match role {
        NodeRole::ControlPlane => CONTROL_PLANE_PORTS,
        NodeRole::Worker => WORKER_PORTS,
    }
}

/// Comment out active swap entries. Returns `None` when nothing changes.
pub fn comment_out_swap(fstab: &str) -> Option<String> {
    let mut changed = false;
    let mut out = String::with_capacity(fstab.len() + 16);
    for line in fstab.lines() {
        let trimmed = line.trim_start();
        let is_swap = !trimmed.starts_with('#')
            && trimmed.split_whitespace().nth(2) == Some("swap");
        if is_swap {
            out.push_str("# ");
            changed = true;
        }
        out.push_str(line);
        out.push('\n');
    }
    changed.then_some(out)
}

/// Persistently and immediately disable swap
pub fn disable_swap(exec: &dyn CommandExecutor) -> Result<Vec<String>> {
    let mut written = Vec::new();
    match exec.read_file(paths::FSTAB) {
        Ok(fstab) => {
            if let Some(updated) = comment_out_swap(&fstab) {
                write_artifact(exec, paths::FSTAB, &updated)?;
                tracing::info!("Commented out swap entries in {}", paths::FSTAB);
                written.push(paths::FSTAB.to_string());
            } else {
                tracing::debug!("No active swap entries in {}", paths::FSTAB);
            }
        }
        Err(e) => tracing::warn!("Could not read {}: {:#}", paths::FSTAB, e),
    }

    if !run_best_effort(exec, "swapoff", &["-a"]) {
        tracing::warn!("swapoff -a failed; the kubelet will refuse to start while swap is on");
    }
    Ok(written)
}

pub fn render_modules_load() -> String {
    let mut out = String::from("# Managed by kubestrap\n");
    for module in KERNEL_MODULES {
        out.push_str(module);
        out.push('\n');
    }
    out
}

pub fn render_sysctl() -> String {
    let mut out = String::from("# Managed by kubestrap\n");
    for (key, value) in SYSCTLS {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out
}

/// Persist kernel modules and sysctls, then apply them now
pub fn configure_system(exec: &dyn CommandExecutor) -> Result<Vec<String>> {
    write_artifact(exec, paths::MODULES_LOAD, &render_modules_load())?;
    write_artifact(exec, paths::SYSCTL_CONF, &render_sysctl())?;

    for module in KERNEL_MODULES {
        if !run_best_effort(exec, "modprobe", &[module]) {
            tracing::warn!("modprobe {} failed", module);
        }
    }
    for (key, value) in SYSCTLS {
        let setting = format!("{}={}", key, value);
        if !run_best_effort(exec, "sysctl", &["-w", &setting]) {
            tracing::warn!("sysctl -w {} failed", setting);
        }
    }

    Ok(vec![
        paths::MODULES_LOAD.to_string(),
        paths::SYSCTL_CONF.to_string(),
    ])
}

/// Local port of every listening socket in `ss -Hltn` output
pub fn parse_listening_ports(ss_output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = ss_output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|local| local.rsplit(':').next())
        .filter_map(|port| port.parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Required ports that already have a listener. Never fatal.
pub fn check_ports(exec: &dyn CommandExecutor, role: NodeRole) -> Vec<u16> {
    let output = match exec.execute_simple("ss", &["-Hltn"]) {
        Ok(output) if output.status.success() => stdout_text(&output),
        _ => {
            tracing::warn!("Could not list listening sockets with ss; skipping port check");
            return Vec::new();
        }
    };
    let listening = parse_listening_ports(&output);
    let busy: Vec<u16> = required_ports(role)
        .iter()
        .copied()
        .filter(|p| listening.contains(p))
        .collect();
    for port in &busy {
        tracing::warn!("Port {} is already in use", port);
    }
    busy
}

/// Preparation phase
pub fn run(exec: &dyn CommandExecutor, config: &ProvisioningConfig) -> Result<PhaseResult> {
    let mut artifacts = disable_swap(exec)?;
    artifacts.extend(configure_system(exec)?);

    let busy = check_ports(exec, config.role);
    let message = if busy.is_empty() {
        "swap off, kernel modules and sysctls configured, required ports free".to_string()
    } else {
        let list: Vec<String> = busy.iter().map(u16::to_string).collect();
        format!(
            "swap off, kernel modules and sysctls configured; ports in use: {}",
            list.join(", ")
        )
    };
    Ok(PhaseResult::succeeded("prepare", message).with_artifacts(artifacts))
}
