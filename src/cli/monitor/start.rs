use crate::Result;
use crate::cli::SshArgs;
use crate::config::{self, ConfigFile};
use crate::monitor::{BackgroundMonitor, MonitorOptions};
use crate::procs::Procs;
use crate::record_store::RecordStore;
use miette::IntoDiagnostic;
use std::sync::Arc;

/// Starts the health monitor in the background
///
/// Any monitor already running is stopped first, so there is never more
/// than one.
#[derive(Debug, clap::Args)]
pub struct Start {
    #[clap(flatten)]
    ssh: SshArgs,
    /// Time between health checks, in seconds or as a duration like "2m" [default: 60]
    #[clap(long, env = "REFRESH_INTERVAL")]
    interval: Option<String>,
}

impl Start {
    pub async fn run(&self) -> Result<()> {
        let file = ConfigFile::load()?;
        let target = config::resolve_target(&self.ssh.overrides(), &file)?;
        target.check_credentials()?;
        let interval = config::resolve_interval(self.interval.as_deref(), &file)?;

        let background =
            BackgroundMonitor::new(RecordStore::default_for_host(), Arc::new(Procs::new()));
        let opts = MonitorOptions { target, interval };
        let record = tokio::task::spawn_blocking(move || background.start(&opts))
            .await
            .into_diagnostic()??;
        println!(
            "monitor: running (pid {}), checking every {}",
            record.pid,
            humantime::format_duration(interval)
        );
        Ok(())
    }
}
