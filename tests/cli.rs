//! Binary-level behavior that needs no root and touches nothing on the host:
//! argument parsing and configuration validation.

use assert_cmd::Command;
use std::process::Output;
use tempfile::TempDir;

fn kubestrap(logs: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kubestrap").unwrap();
    cmd.env_clear()
        .env("KUBESTRAP_LOG_FILE", logs.path().join("kubestrap.log"))
        .write_stdin("");
    cmd
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn help_lists_provisioning_flags() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--node-type", "--cni-provider", "--join-command", "--force-reset", "--log-file"] {
        assert!(stdout.contains(flag), "missing {} in help", flag);
    }
}

#[test]
fn missing_node_type_fails_validation() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--node-type is required"));
}

#[test]
fn worker_without_join_info_fails_without_prompting() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs)
        .args(["--node-type", "worker"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--join-command or --token"));
}

#[test]
fn validation_error_is_logged_to_console_and_file() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs)
        .args(["--node-type", "worker"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let expected = "[ERROR] validate failed: Invalid configuration: a worker node needs";
    assert!(stderr(&output).contains(expected), "stderr: {}", stderr(&output));
    let logged = std::fs::read_to_string(logs.path().join("kubestrap.log")).unwrap();
    assert!(logged.contains(expected), "log file: {}", logged);
    assert_eq!(logged.matches("[ERROR]").count(), 1);
}

#[test]
fn node_type_is_read_from_environment() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs)
        .env("KUBESTRAP_NODE_TYPE", "worker")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--join-command or --token"));
}

#[test]
fn unsupported_cni_provider_is_rejected() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs)
        .args([
            "--node-type",
            "control-plane",
            "--control-plane-endpoint",
            "cp.example.com",
            "--cni-provider",
            "weave",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Unsupported CNI provider 'weave'"));
}

#[test]
fn overlapping_cidrs_are_rejected() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs)
        .args([
            "--node-type",
            "control-plane",
            "--control-plane-endpoint",
            "cp.example.com",
            "--pod-network-cidr",
            "10.96.0.0/16",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("overlaps service CIDR"));
}

#[test]
fn reset_requires_confirmation() {
    let logs = TempDir::new().unwrap();
    let output = kubestrap(&logs).arg("reset").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--yes"));
}
