use crate::Result;
use crate::monitor::BackgroundMonitor;
use crate::procs::Procs;
use crate::record_store::RecordStore;
use miette::IntoDiagnostic;
use std::sync::Arc;

/// Stops the background health monitor, leaving tunnels running
#[derive(Debug, clap::Args)]
pub struct Stop {
    /// Signal the tracked pid even if it no longer looks like a monitor
    #[clap(short, long)]
    force: bool,
}

impl Stop {
    pub async fn run(&self) -> Result<()> {
        let background =
            BackgroundMonitor::new(RecordStore::default_for_host(), Arc::new(Procs::new()));
        let force = self.force;
        match tokio::task::spawn_blocking(move || background.stop(force))
            .await
            .into_diagnostic()??
        {
            Some(pid) => println!("monitor: stopped (pid {pid})"),
            None => println!("monitor: not running"),
        }
        Ok(())
    }
}
