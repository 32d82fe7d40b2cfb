//! Default action: provision this node

use super::{acquire_run_lock, step};
use crate::config::{NodeRole, ProvisionArgs, ProvisioningConfig, paths};
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::services::kubeadm::ClusterBootstrapOutcome;
use crate::utils::{HttpDownloader, LocalExecutor};
use anyhow::Context;
use std::env;
use std::io::{self, BufRead, IsTerminal, Write};

/// Validate, lock, run the pipeline and print the outcome.
/// Every error returned here has already been logged.
pub fn handle_provision(mut args: ProvisionArgs) -> Result<()> {
    if needs_join_prompt(&args) && io::stdin().is_terminal() {
        args.join_command = step("validate", prompt_join_command())?;
    }

    let config = step(
        "validate",
        ProvisioningConfig::from_args(&args, env::var("SUDO_USER").ok()),
    )?;
    let _lock = step("lock", acquire_run_lock())?;

    let exec = LocalExecutor;
    let downloader = step("preflight", HttpDownloader::new().map_err(Error::from))?;
    let mut pipeline = Pipeline::new(&exec, &downloader, &config);
    let result = pipeline.run();
    let report = pipeline.into_report();

    print_summary(&report);
    result?;
    print_next_steps(&report);
    Ok(())
}

/// A worker with no way to find the control plane
pub fn needs_join_prompt(args: &ProvisionArgs) -> bool {
    let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
    args.node_type == Some(NodeRole::Worker) && blank(&args.token) && blank(&args.join_command)
}

fn prompt_join_command() -> Result<Option<String>> {
    print!("Paste the join command printed by the control plane (kubeadm join ...): ");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read join command")?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

fn print_summary(report: &PipelineReport) {
    tracing::info!("Summary:");
    for phase in &report.phases {
        tracing::info!("  {:<10} {:<8} {}", phase.phase, phase.status, phase.message);
    }
}

fn print_next_steps(report: &PipelineReport) {
    match &report.outcome {
        Some(ClusterBootstrapOutcome::Initialized {
            join_command,
            admin_kubeconfig,
            ..
        }) => {
            crate::success!("Control plane is ready (kubeconfig: {})", admin_kubeconfig);
            match join_command {
                Some(command) => {
                    println!();
                    println!("Join worker nodes by running as root on each of them:");
                    println!();
                    println!("  {}", command);
                    println!();
                    println!("(saved to {})", paths::JOIN_COMMAND_FILE);
                }
                None => println!(
                    "Create a join command with: kubeadm token create --print-join-command"
                ),
            }
        }
        Some(ClusterBootstrapOutcome::Joined { .. }) => {
            crate::success!("Worker is part of the cluster; check it with 'kubectl get nodes' on the control plane");
        }
        None => {}
    }
}
