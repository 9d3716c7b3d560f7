//! Tunnel reconciliation.
//!
//! `Supervisor::reconcile` compares the desired ports against the record store
//! and the live process table, and launches whatever is missing or broken.
//! Healthy tunnels are never touched.

use crate::Result;
use crate::procs::ProcessInspector;
use crate::record::TunnelRecord;
use crate::record_store::RecordStore;
use crate::tunnel::{Launcher, SshTarget};
use crate::verifier::{self, Identity};
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

/// What reconciliation decided for one port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TunnelAction {
    Started,
    Skipped,
    RestartedMismatch,
    RestartedDead,
    LaunchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortReport {
    pub port: u16,
    pub action: TunnelAction,
    /// The pid now tracked for the port, if any.
    pub pid: Option<u32>,
    /// The stale pid that was dropped, for restarts.
    pub previous_pid: Option<u32>,
    pub log_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl PortReport {
    fn new(port: u16, action: TunnelAction) -> Self {
        Self {
            port,
            action,
            pid: None,
            previous_pid: None,
            log_path: None,
            error: None,
        }
    }

    fn failed(port: u16, previous_pid: Option<u32>, err: impl Display) -> Self {
        Self {
            previous_pid,
            error: Some(err.to_string()),
            ..Self::new(port, TunnelAction::LaunchFailed)
        }
    }
}

impl Display for PortReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pid = self.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        write!(f, "port {}: {}", self.port, self.action)?;
        match self.action {
            TunnelAction::Started => write!(f, " (pid {pid})"),
            TunnelAction::Skipped => write!(f, " (pid {pid} still healthy)"),
            TunnelAction::RestartedMismatch => write!(
                f,
                " (pid {} belongs to another process, new pid {pid})",
                self.previous_pid.unwrap_or_default()
            ),
            TunnelAction::RestartedDead => write!(
                f,
                " (pid {} was gone, new pid {pid})",
                self.previous_pid.unwrap_or_default()
            ),
            TunnelAction::LaunchFailed => {
                write!(f, ": {}", self.error.as_deref().unwrap_or("unknown error"))
            }
        }
    }
}

/// Per-port outcomes of one reconciliation pass, ascending by port.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    pub ports: Vec<PortReport>,
}

impl ReconcileReport {
    pub fn get(&self, port: u16) -> Option<&PortReport> {
        self.ports.iter().find(|r| r.port == port)
    }

    pub fn action(&self, port: u16) -> Option<TunnelAction> {
        self.get(port).map(|r| r.action)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PortReport> {
        self.ports.iter().filter(|r| r.action.is_launch_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// e.g. `3 ports: 1 started, 2 skipped`
    pub fn summary(&self) -> String {
        let counts = self
            .ports
            .iter()
            .map(|r| r.action)
            .counts()
            .into_iter()
            .sorted_by_key(|(action, _)| *action as u8)
            .map(|(action, n)| format!("{n} {action}"))
            .join(", ");
        if counts.is_empty() {
            "no ports".to_string()
        } else {
            format!("{} ports: {counts}", self.ports.len())
        }
    }
}

impl Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.ports {
            writeln!(f, "{report}")?;
        }
        Ok(())
    }
}

pub struct Supervisor {
    store: RecordStore,
    target: SshTarget,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn Launcher>,
}

impl Supervisor {
    pub fn new(
        store: RecordStore,
        target: SshTarget,
        inspector: Arc<dyn ProcessInspector>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            store,
            target,
            inspector,
            launcher,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Brings every port in `desired` to a running tunnel. Ports are handled
    /// one at a time in ascending order; a failure on one port never stops
    /// the others.
    pub fn reconcile(&self, desired: impl IntoIterator<Item = u16>) -> ReconcileReport {
        let ports: BTreeSet<u16> = desired.into_iter().collect();
        ReconcileReport {
            ports: ports
                .into_iter()
                .filter_map(|p| self.reconcile_port(p, false))
                .collect(),
        }
    }

    /// Reconciles every port that currently has a record. A record removed
    /// after the listing (by a concurrent `stop`) drops its port from the pass.
    pub fn reconcile_tracked(&self) -> Result<ReconcileReport> {
        Ok(ReconcileReport {
            ports: self
                .store
                .tunnel_ports()?
                .into_iter()
                .filter_map(|p| self.reconcile_port(p, true))
                .collect(),
        })
    }

    /// With `tracked_only`, a port whose record is gone once the lock is held
    /// is left alone and yields no report.
    fn reconcile_port(&self, port: u16, tracked_only: bool) -> Option<PortReport> {
        // held until the record for this port reflects our decision
        let _lock = match self.store.lock_port(port) {
            Ok(lock) => lock,
            Err(err) => return Some(PortReport::failed(port, None, err)),
        };

        let stale = match self.store.get_tunnel(port) {
            Ok(None) if tracked_only => {
                debug!("record for port {port} went away, skipping");
                return None;
            }
            Ok(None) => None,
            Ok(Some(record)) => match self.identify(&record) {
                Identity::Healthy => {
                    debug!("tunnel for port {port} is healthy (pid {})", record.pid);
                    return Some(PortReport {
                        pid: Some(record.pid),
                        log_path: Some(record.log_path),
                        ..PortReport::new(port, TunnelAction::Skipped)
                    });
                }
                Identity::WrongProcess => {
                    // the pid now belongs to someone else: stop tracking it, never signal it
                    info!(
                        "pid {} recorded for port {port} is no longer our tunnel, replacing",
                        record.pid
                    );
                    Some((record.pid, TunnelAction::RestartedMismatch))
                }
                Identity::Dead => {
                    info!("tunnel for port {port} (pid {}) is gone, replacing", record.pid);
                    Some((record.pid, TunnelAction::RestartedDead))
                }
            },
            Err(err) => {
                warn!("discarding unreadable record for port {port}: {err}");
                Some((0, TunnelAction::RestartedDead))
            }
        };
        let previous_pid = stale.map(|(pid, _)| pid).filter(|pid| *pid != 0);

        if stale.is_some()
            && let Err(err) = self.store.remove_tunnel(port)
        {
            return Some(PortReport::failed(port, previous_pid, err));
        }

        Some(match self.launch(port) {
            Ok(record) => PortReport {
                pid: Some(record.pid),
                previous_pid,
                log_path: Some(record.log_path),
                ..PortReport::new(
                    port,
                    stale.map_or(TunnelAction::Started, |(_, action)| action),
                )
            },
            Err(err) => {
                warn!("failed to launch tunnel for port {port}: {err}");
                PortReport::failed(port, previous_pid, err)
            }
        })
    }

    fn identify(&self, record: &TunnelRecord) -> Identity {
        verifier::verify(
            self.inspector.as_ref(),
            record.pid,
            record.port,
            &self.target.destination(),
        )
    }

    fn launch(&self, port: u16) -> Result<TunnelRecord> {
        let log_path = self.store.new_log_path(&format!("tunnel-{port}"))?;
        let pid = self.launcher.launch(&self.target, port, &log_path)?;
        let record =
            TunnelRecord::new(port, pid, log_path).with_endpoint(self.target.to_string());
        if let Err(err) = self.store.put_tunnel(&record) {
            // untracked tunnels would be invisible to teardown
            self.inspector.terminate(pid);
            return Err(err);
        }
        info!("tunnel for port {port} started with pid {pid}");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_report_display() {
        let r = PortReport {
            pid: Some(12),
            ..PortReport::new(8080, TunnelAction::Started)
        };
        assert_eq!(r.to_string(), "port 8080: started (pid 12)");

        let r = PortReport {
            pid: Some(13),
            previous_pid: Some(12),
            ..PortReport::new(8080, TunnelAction::RestartedDead)
        };
        assert_eq!(
            r.to_string(),
            "port 8080: restarted_dead (pid 12 was gone, new pid 13)"
        );

        let r = PortReport::failed(8080, None, "ssh not found");
        assert_eq!(r.to_string(), "port 8080: launch_failed: ssh not found");
    }

    #[test]
    fn test_report_summary() {
        let report = ReconcileReport {
            ports: vec![
                PortReport::new(1, TunnelAction::Skipped),
                PortReport::new(2, TunnelAction::Started),
                PortReport::new(3, TunnelAction::Skipped),
            ],
        };
        assert_eq!(report.summary(), "3 ports: 1 started, 2 skipped");
        assert!(!report.has_failures());
        assert_eq!(report.action(2), Some(TunnelAction::Started));
        assert_eq!(ReconcileReport::default().summary(), "no ports");
    }
}
