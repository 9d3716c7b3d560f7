use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, UpdateKind};
#[cfg(unix)]
use sysinfo::Signal;

/// What the OS process table says about a pid right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub exists: bool,
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    pub fn dead() -> Self {
        Self::default()
    }

    pub fn running<I, S>(cmdline: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exists: true,
            cmdline: cmdline.into_iter().map(Into::into).collect(),
        }
    }
}

/// Live view of the process table. Implementations must query the OS on
/// every call; nothing about a pid may be cached between calls.
pub trait ProcessInspector: Send + Sync {
    fn inspect(&self, pid: u32) -> ProcessInfo;

    /// Sends SIGTERM and waits briefly for the process to go away, escalating
    /// to SIGKILL. Returns false if there was no such process.
    fn terminate(&self, pid: u32) -> bool;
}

/// How long `terminate` waits after SIGTERM before sending SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(3);
const TERM_POLL: Duration = Duration::from_millis(50);

/// `ProcessInspector` backed by `sysinfo`.
pub struct Procs {
    system: Mutex<sysinfo::System>,
}

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, sysinfo::System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("System mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn refresh_pid(system: &mut sysinfo::System, pid: sysinfo::Pid) {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.inspect(pid).exists
    }

    fn signal_term(&self, pid: u32) -> bool {
        let mut system = self.lock_system();
        let spid = sysinfo::Pid::from_u32(pid);
        Self::refresh_pid(&mut system, spid);
        match system.process(spid) {
            Some(process) if process.status() != ProcessStatus::Zombie => {
                debug!("sending SIGTERM to {pid}");
                #[cfg(unix)]
                let sent = process.kill_with(Signal::Term).unwrap_or_else(|| process.kill());
                #[cfg(windows)]
                let sent = process.kill();
                sent
            }
            _ => false,
        }
    }

    fn signal_kill(&self, pid: u32) {
        let mut system = self.lock_system();
        let spid = sysinfo::Pid::from_u32(pid);
        Self::refresh_pid(&mut system, spid);
        if let Some(process) = system.process(spid) {
            warn!("process {pid} ignored SIGTERM, sending SIGKILL");
            process.kill();
        }
    }
}

impl ProcessInspector for Procs {
    fn inspect(&self, pid: u32) -> ProcessInfo {
        let mut system = self.lock_system();
        let spid = sysinfo::Pid::from_u32(pid);
        Self::refresh_pid(&mut system, spid);
        match system.process(spid) {
            // an exited but unreaped child is as good as dead
            Some(process) if process.status() != ProcessStatus::Zombie => ProcessInfo {
                exists: true,
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect(),
            },
            _ => ProcessInfo::dead(),
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        if !self.signal_term(pid) {
            return false;
        }
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if !self.is_running(pid) {
                return true;
            }
            std::thread::sleep(TERM_POLL);
        }
        self.signal_kill(pid);
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_inspect_live_and_dead_process() {
        let procs = Procs::new();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        let info = procs.inspect(pid);
        assert!(info.exists);
        assert!(info.cmdline.iter().any(|a| a == "30"), "{info:?}");

        assert!(procs.terminate(pid));
        child.wait().unwrap();
        assert!(!procs.inspect(pid).exists);
        assert!(!procs.terminate(pid));
    }

    #[test]
    fn test_zombie_counts_as_dead() {
        let procs = Procs::new();
        let mut child = Command::new("sh").arg("-c").arg("exit 0").spawn().unwrap();
        let pid = child.id();
        // not reaped yet: wait until the kernel marks it a zombie
        let deadline = Instant::now() + Duration::from_secs(5);
        while procs.inspect(pid).exists && Instant::now() < deadline {
            std::thread::sleep(TERM_POLL);
        }
        assert!(!procs.inspect(pid).exists);
        child.wait().unwrap();
    }
}
