use crate::Result;
use crate::config::SshOverrides;
use crate::procs::Procs;
use crate::record_store::RecordStore;
use crate::supervisor::{ReconcileReport, Supervisor};
use crate::tunnel::{SshLauncher, SshTarget};
use clap::Parser;
use std::sync::Arc;

mod monitor;
mod reconcile;
mod start;
mod status;
mod stop;

/// Keeps a set of local ports forwarded through SSH tunnels
#[derive(Debug, clap::Parser)]
#[clap(name = "tunnelkeeper", version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    Monitor(monitor::Monitor),
    Reconcile(reconcile::Reconcile),
    Start(start::Start),
    Status(status::Status),
    Stop(stop::Stop),
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Commands::Monitor(monitor) => monitor.run().await,
        Commands::Reconcile(reconcile) => reconcile.run().await,
        Commands::Start(start) => start.run().await,
        Commands::Status(status) => status.run().await,
        Commands::Stop(stop) => stop.run().await,
    }
}

/// Where and how to reach the SSH server. Unset values fall back to the
/// config file.
#[derive(Debug, Clone, clap::Args)]
pub struct SshArgs {
    /// SSH server to tunnel through
    #[clap(long, env = "SSH_HOST")]
    ssh_host: Option<String>,
    /// SSH server port [default: 22]
    #[clap(long, env = "SSH_PORT")]
    ssh_port: Option<u16>,
    /// SSH login user
    #[clap(long, env = "SSH_USER")]
    ssh_user: Option<String>,
    /// Log in with a password through sshpass instead of keys
    #[clap(long, env = "SSH_PASSWORD", hide_env_values = true)]
    ssh_password: Option<String>,
    /// Extra argument for ssh, repeatable (e.g. --ssh-option=-i --ssh-option=~/.ssh/dev)
    #[clap(long = "ssh-option", allow_hyphen_values = true)]
    ssh_options: Vec<String>,
}

impl SshArgs {
    pub fn overrides(&self) -> SshOverrides {
        SshOverrides {
            host: self.ssh_host.clone(),
            port: self.ssh_port,
            user: self.ssh_user.clone(),
            password: self.ssh_password.clone(),
            options: self.ssh_options.clone(),
        }
    }
}

fn supervisor(target: SshTarget) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(
        RecordStore::default_for_host(),
        target,
        Arc::new(Procs::new()),
        Arc::new(SshLauncher),
    ))
}

/// One line per port on stdout.
fn print_report(report: &ReconcileReport) {
    for port in &report.ports {
        println!("{port}");
    }
    if !report.is_empty() {
        info!("{}", report.summary());
    }
}
