use crate::Result;
use crate::cli::SshArgs;
use crate::config::{self, ConfigFile};
use crate::monitor::{BackgroundMonitor, Monitor};
use crate::procs::{ProcessInspector, Procs};
use crate::record_store::RecordStore;
use crate::supervisor::Supervisor;
use crate::tunnel::SshLauncher;
use miette::IntoDiagnostic;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Runs the health monitor in the foreground
#[derive(Debug, clap::Args)]
pub struct Run {
    /// Time between health checks, in seconds or as a duration like "2m" [default: 60]
    #[clap(long, env = "REFRESH_INTERVAL")]
    interval: Option<String>,
    /// Append each cycle's report to this file
    #[clap(long)]
    log_file: Option<PathBuf>,
    #[clap(flatten)]
    ssh: SshArgs,
}

impl Run {
    pub async fn run(&self) -> Result<()> {
        let file = ConfigFile::load()?;
        let target = config::resolve_target(&self.ssh.overrides(), &file)?;
        target.check_credentials()?;
        let interval = config::resolve_interval(self.interval.as_deref(), &file)?;

        let store = RecordStore::default_for_host();
        let inspector: Arc<dyn ProcessInspector> = Arc::new(Procs::new());
        let background = Arc::new(BackgroundMonitor::new(store.clone(), inspector.clone()));
        let pid = std::process::id();
        {
            let background = background.clone();
            let log_file = self.log_file.clone();
            tokio::task::spawn_blocking(move || background.claim(pid, interval, log_file))
                .await
                .into_diagnostic()??;
        }

        let supervisor = Arc::new(Supervisor::new(
            store,
            target,
            inspector,
            Arc::new(SshLauncher),
        ));
        let mut monitor = Monitor::new(supervisor, interval);
        if let Some(log_file) = &self.log_file {
            monitor = monitor.with_log(log_file);
        }
        let handle = monitor.spawn();
        watch_signals(handle.cancel_token());
        handle.wait().await;

        tokio::task::spawn_blocking(move || background.release(pid))
            .await
            .into_diagnostic()?
    }
}

static RECEIVED_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The first signal ends the loop after its current cycle; a second one
/// exits right away.
#[cfg(unix)]
fn watch_signals(cancel: CancellationToken) {
    use tokio::signal::unix::SignalKind;
    let signals = [
        SignalKind::terminate(),
        SignalKind::interrupt(),
        SignalKind::hangup(),
    ];
    for kind in signals {
        let mut stream = match signal::unix::signal(kind) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register signal handler for {kind:?}: {e}");
                continue;
            }
        };
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                stream.recv().await;
                on_signal(&cancel);
            }
        });
    }
}

#[cfg(windows)]
fn watch_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to wait for ctrl-c: {e}");
                return;
            }
            on_signal(&cancel);
        }
    });
}

fn on_signal(cancel: &CancellationToken) {
    if RECEIVED_SIGNAL.swap(true, Ordering::SeqCst) {
        exit(1);
    }
    info!("received signal, stopping monitor");
    cancel.cancel();
}
