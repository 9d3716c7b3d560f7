//! Stopping everything that is tracked.

use crate::monitor::BackgroundMonitor;
use crate::procs::ProcessInspector;
use crate::record_store::RecordStore;
use crate::verifier::{self, Identity};
use crate::{Result, env};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TeardownReport {
    /// Ports whose tunnel process was signalled.
    pub terminated: Vec<u16>,
    /// Ports whose record was dropped without signalling (dead or not ours).
    pub untracked: Vec<u16>,
    pub monitor: Option<u32>,
}

impl TeardownReport {
    pub fn is_noop(&self) -> bool {
        self.terminated.is_empty() && self.untracked.is_empty() && self.monitor.is_none()
    }
}

pub struct Teardown {
    store: RecordStore,
    inspector: Arc<dyn ProcessInspector>,
    /// Signal live pids even when they fail identity verification.
    force: bool,
    monitor_program: PathBuf,
}

impl Teardown {
    pub fn new(store: RecordStore, inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            store,
            inspector,
            force: false,
            monitor_program: env::TUNNELKEEPER_BIN.clone(),
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The binary a tracked monitor is expected to be running.
    pub fn with_monitor_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.monitor_program = program.into();
        self
    }

    /// Terminates tracked tunnels, then the monitor, then clears every record.
    /// Running it with nothing tracked is a no-op.
    pub fn run(&self) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();
        for record in self.store.tunnels()? {
            let _lock = self.store.lock_port(record.port)?;
            let identity = verifier::verify_record(self.inspector.as_ref(), &record);
            let signal = match identity {
                Identity::Healthy => true,
                Identity::WrongProcess => self.force,
                Identity::Dead => false,
            };
            if signal && self.inspector.terminate(record.pid) {
                info!("stopped tunnel for port {} (pid {})", record.port, record.pid);
                report.terminated.push(record.port);
            } else {
                if identity.is_wrong_process() {
                    warn!(
                        "pid {} for port {} is not our tunnel anymore, leaving it alone",
                        record.pid, record.port
                    );
                }
                report.untracked.push(record.port);
            }
            self.store.remove_tunnel(record.port)?;
        }

        report.monitor = BackgroundMonitor::new(self.store.clone(), self.inspector.clone())
            .with_program(&self.monitor_program)
            .stop(self.force)?;

        self.store.clear()?;
        Ok(report)
    }
}
