use clap::Parser;
use kubestrap::commands::{self, Commands, provision};
use kubestrap::config::ProvisionArgs;
use kubestrap::logging;
use std::process;

#[derive(Parser)]
#[command(name = "kubestrap", version)]
#[command(about = "Bootstrap a kubeadm control-plane or worker node; safe to re-run", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    provision: ProvisionArgs,
}

fn main() {
    // Load .env from the working directory before clap reads KUBESTRAP_* variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let log_file = cli.provision.effective_log_file();
    logging::init(cli.provision.effective_log_level(), Some(log_file.as_path()));

    let result = match cli.command {
        Some(command) => commands::handle_command(command),
        None => provision::handle_provision(cli.provision),
    };

    // Failures were logged as ERROR by the step that raised them
    if result.is_err() {
        process::exit(1);
    }
}
