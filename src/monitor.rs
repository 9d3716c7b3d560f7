//! Health monitor.
//!
//! [`Monitor`] is the in-process loop: every cycle it reconciles the ports
//! that currently have records (so tunnels added by a later `start` are picked
//! up), appends the outcome to the monitor log, then sleeps. It stops when its
//! cancellation token fires.
//!
//! [`BackgroundMonitor`] manages the detached `tunnelkeeper monitor run`
//! process and its singleton record: at most one monitor per host.

use crate::procs::ProcessInspector;
use crate::record::MonitorRecord;
use crate::record_store::RecordStore;
use crate::supervisor::{ReconcileReport, Supervisor};
use crate::tunnel::SshTarget;
use crate::{Result, env};
use duct::cmd;
use miette::IntoDiagnostic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

pub struct Monitor {
    supervisor: Arc<Supervisor>,
    interval: Duration,
    log_path: Option<PathBuf>,
}

impl Monitor {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
            log_path: None,
        }
    }

    /// Append each cycle's report to this file.
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Runs the loop on a background task.
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        MonitorHandle { cancel, task }
    }

    /// Runs until `cancel` fires. Cancellation is observed between cycles, so
    /// a cycle in progress always completes.
    pub async fn run(self, cancel: CancellationToken) {
        info!("monitor started, checking every {:?}", self.interval);
        while !cancel.is_cancelled() {
            match self.run_cycle().await {
                Ok(report) => self.record_cycle(&report).await,
                Err(err) => error!("monitor cycle failed: {err:?}"),
            }
            select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("monitor stopped");
    }

    /// One reconciliation over every tracked port.
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let supervisor = self.supervisor.clone();
        tokio::task::spawn_blocking(move || supervisor.reconcile_tracked())
            .await
            .into_diagnostic()?
    }

    async fn record_cycle(&self, report: &ReconcileReport) {
        for port in &report.ports {
            if port.action.is_skipped() {
                debug!("{port}");
            } else if port.action.is_launch_failed() {
                warn!("{port}");
            } else {
                info!("{port}");
            }
        }
        let Some(log_path) = &self.log_path else {
            return;
        };
        if let Err(err) = append_report(log_path, report).await {
            error!("failed to write monitor log {}: {err}", log_path.display());
        }
    }
}

async fn append_report(path: &Path, report: &ReconcileReport) -> std::io::Result<()> {
    let mut file = tokio::fs::File::options()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut out = format!("{now} cycle: {}\n", report.summary());
    for port in &report.ports {
        out.push_str(&format!("{now} {port}\n"));
    }
    file.write_all(out.as_bytes()).await?;
    file.flush().await
}

/// Handle to a running [`Monitor`] task.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the loop and waits for it to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for the loop to end, by cancellation or otherwise.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            error!("monitor task panicked: {err}");
        }
    }
}

/// Settings a background monitor process needs to relaunch tunnels.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub target: SshTarget,
    pub interval: Duration,
}

/// Owns the monitor singleton record and the detached monitor process.
pub struct BackgroundMonitor {
    store: RecordStore,
    inspector: Arc<dyn ProcessInspector>,
    program: PathBuf,
}

impl BackgroundMonitor {
    pub fn new(store: RecordStore, inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            store,
            inspector,
            program: env::TUNNELKEEPER_BIN.clone(),
        }
    }

    /// Use a different tunnelkeeper binary for the monitor process.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Starts a monitor process, terminating any existing one first. The new
    /// record is written only after the old monitor is gone.
    pub fn start(&self, opts: &MonitorOptions) -> Result<MonitorRecord> {
        let _lock = self.store.lock_monitor()?;
        self.retire_existing(None, false)?;

        let log_path = self.store.new_log_path("monitor")?;
        let args = monitor_args(opts, &log_path);
        debug!(
            "starting monitor: {} {}",
            self.program.display(),
            shell_words::join(&args)
        );
        // append mode: the monitor writes reports to the same file
        let log_file = std::fs::File::options()
            .append(true)
            .create(true)
            .open(&log_path)
            .into_diagnostic()?;
        let mut expr = cmd(&self.program, &args)
            .stdin_null()
            .stdout_file(log_file)
            .stderr_to_stdout()
            .env("TUNNELKEEPER_STATE_DIR", self.store.root());
        if let Some(password) = &opts.target.password {
            expr = expr.env("SSH_PASSWORD", password);
        }
        #[cfg(unix)]
        {
            expr = expr.before_spawn(|command| {
                use std::os::unix::process::CommandExt;
                command.process_group(0);
                Ok(())
            });
        }
        let handle = expr.start().into_diagnostic()?;
        let pid = handle
            .pids()
            .first()
            .copied()
            .ok_or_else(|| miette::miette!("monitor process exited before its pid was known"))?;

        let record = MonitorRecord {
            interval_secs: Some(opts.interval.as_secs()),
            log_path: Some(log_path),
            ..MonitorRecord::new(pid)
        };
        self.store.put_monitor(&record)?;
        info!("monitor started with pid {pid}");
        Ok(record)
    }

    /// Registers the current process as the monitor, replacing any other
    /// live monitor. Used by `monitor run` so a monitor started by hand still
    /// keeps the singleton invariant.
    pub fn claim(&self, pid: u32, interval: Duration, log_path: Option<PathBuf>) -> Result<()> {
        let _lock = self.store.lock_monitor()?;
        if let Some(existing) = self.store.get_monitor()?
            && existing.pid == pid
        {
            return Ok(());
        }
        self.retire_existing(Some(pid), false)?;
        self.store.put_monitor(&MonitorRecord {
            interval_secs: Some(interval.as_secs()),
            log_path,
            ..MonitorRecord::new(pid)
        })
    }

    /// Removes the record if it still names `pid`. Takes no lock: whoever
    /// holds it may be waiting for this process to exit, and nobody writes a
    /// new record before the monitor it names is gone.
    pub fn release(&self, pid: u32) -> Result<()> {
        if self.store.get_monitor()?.is_some_and(|m| m.pid == pid) {
            self.store.remove_monitor()?;
        }
        Ok(())
    }

    /// Terminates the tracked monitor and removes its record. A pid that no
    /// longer looks like a monitor is only signalled with `force`.
    pub fn stop(&self, force: bool) -> Result<Option<u32>> {
        let _lock = self.store.lock_monitor()?;
        self.retire_existing(None, force)
    }

    pub fn status(&self) -> Result<Option<(MonitorRecord, bool)>> {
        Ok(self.store.get_monitor()?.map(|record| {
            let alive = self.is_monitor(record.pid);
            (record, alive)
        }))
    }

    /// Caller holds the monitor lock. Returns the pid that was terminated.
    fn retire_existing(&self, keep: Option<u32>, force: bool) -> Result<Option<u32>> {
        let Some(existing) = self.store.get_monitor()? else {
            return Ok(None);
        };
        let mut stopped = None;
        if Some(existing.pid) != keep {
            let info = self.inspector.inspect(existing.pid);
            if info.exists && (force || is_monitor_process(&info.cmdline, &self.program)) {
                info!("stopping monitor with pid {}", existing.pid);
                if self.inspector.terminate(existing.pid) {
                    stopped = Some(existing.pid);
                }
            } else if info.exists {
                warn!(
                    "monitor pid {} now belongs to another process, not signalling it",
                    existing.pid
                );
            }
        }
        self.store.remove_monitor()?;
        Ok(stopped)
    }

    fn is_monitor(&self, pid: u32) -> bool {
        let info = self.inspector.inspect(pid);
        info.exists && is_monitor_process(&info.cmdline, &self.program)
    }
}

fn monitor_args(opts: &MonitorOptions, log_path: &Path) -> Vec<String> {
    let target = &opts.target;
    let mut args = vec![
        "monitor".to_string(),
        "run".to_string(),
        "--interval".to_string(),
        opts.interval.as_secs().max(1).to_string(),
        "--log-file".to_string(),
        log_path.display().to_string(),
        "--ssh-host".to_string(),
        target.host.clone(),
        "--ssh-port".to_string(),
        target.port.to_string(),
        "--ssh-user".to_string(),
        target.user.clone(),
    ];
    for opt in &target.options {
        args.push(format!("--ssh-option={opt}"));
    }
    args
}

/// True if `cmdline` is `<program> ... monitor run ...`.
pub fn is_monitor_process(cmdline: &[String], program: &Path) -> bool {
    let Some(first) = cmdline.first() else {
        return false;
    };
    let same_program = Path::new(first).file_name() == program.file_name();
    same_program
        && cmdline
            .windows(2)
            .any(|w| w[0] == "monitor" && w[1] == "run")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_monitor_process() {
        let program = Path::new("/usr/local/bin/tunnelkeeper");
        let argv = |s: &str| s.split_whitespace().map(String::from).collect::<Vec<_>>();
        assert!(is_monitor_process(
            &argv("/usr/local/bin/tunnelkeeper monitor run --interval 60"),
            program
        ));
        assert!(is_monitor_process(&argv("tunnelkeeper monitor run"), program));
        assert!(!is_monitor_process(&argv("tunnelkeeper monitor stop"), program));
        assert!(!is_monitor_process(&argv("python monitor run"), program));
        assert!(!is_monitor_process(&[], program));
    }

    #[test]
    fn test_monitor_args_keep_password_out() {
        let opts = MonitorOptions {
            target: SshTarget::new("example.com", 2222, "dev")
                .with_password(Some("hunter2".to_string())),
            interval: Duration::from_secs(30),
        };
        let args = monitor_args(&opts, Path::new("/tmp/monitor.log"));
        assert_eq!(&args[..2], ["monitor", "run"]);
        assert!(args.windows(2).any(|w| w == ["--interval", "30"]));
        assert!(args.windows(2).any(|w| w == ["--ssh-port", "2222"]));
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }
}
