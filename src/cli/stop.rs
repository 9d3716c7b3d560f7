use crate::Result;
use crate::procs::Procs;
use crate::record_store::RecordStore;
use crate::teardown::Teardown;
use miette::IntoDiagnostic;
use std::sync::Arc;

/// Stops every tracked tunnel and the health monitor
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "stop-tunnels",
    verbatim_doc_comment,
    long_about = "\
Stops every tracked tunnel and the health monitor

Sends SIGTERM to each tracked tunnel, then to the monitor, and forgets
them all. A tracked pid that now belongs to some other program is only
forgotten, never signalled, unless --force is given. Running it when
nothing is tracked is fine.

Examples:
  tunnelkeeper stop
  tunnelkeeper stop --force     Also signal pids that fail verification"
)]
pub struct Stop {
    /// Signal every live tracked pid, even ones that no longer look like ours
    #[clap(short, long)]
    force: bool,
}

impl Stop {
    pub async fn run(&self) -> Result<()> {
        let teardown =
            Teardown::new(RecordStore::default_for_host(), Arc::new(Procs::new())).force(self.force);
        let report = tokio::task::spawn_blocking(move || teardown.run())
            .await
            .into_diagnostic()??;

        if report.is_noop() {
            println!("nothing to stop");
            return Ok(());
        }
        for port in &report.terminated {
            println!("port {port}: stopped");
        }
        for port in &report.untracked {
            println!("port {port}: forgotten");
        }
        if let Some(pid) = report.monitor {
            println!("monitor: stopped (pid {pid})");
        }
        Ok(())
    }
}
