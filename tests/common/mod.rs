#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tunnelkeeper::error::LaunchError;
use tunnelkeeper::procs::{ProcessInfo, ProcessInspector};
use tunnelkeeper::record_store::RecordStore;
use tunnelkeeper::supervisor::Supervisor;
use tunnelkeeper::tunnel::{Launcher, SshTarget};

pub const MONITOR_PROGRAM: &str = "/usr/local/bin/tunnelkeeper";

pub fn argv(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

/// In-memory process table standing in for the OS.
pub struct ProcessTable {
    inner: Mutex<TableInner>,
}

struct TableInner {
    procs: HashMap<u32, Vec<String>>,
    next_pid: u32,
    signalled: Vec<u32>,
}

impl ProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TableInner {
                procs: HashMap::new(),
                next_pid: 1000,
                signalled: vec![],
            }),
        })
    }

    pub fn spawn(&self, cmdline: Vec<String>) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let pid = inner.next_pid;
        inner.next_pid += 1;
        inner.procs.insert(pid, cmdline);
        pid
    }

    /// The process dies on its own; nobody signalled it.
    pub fn kill(&self, pid: u32) {
        self.inner.lock().unwrap().procs.remove(&pid);
    }

    /// The pid is recycled by an unrelated program.
    pub fn reuse(&self, pid: u32, cmdline: Vec<String>) {
        self.inner.lock().unwrap().procs.insert(pid, cmdline);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.inner.lock().unwrap().procs.contains_key(&pid)
    }

    pub fn alive(&self) -> usize {
        self.inner.lock().unwrap().procs.len()
    }

    /// Pids that received a termination signal, in order.
    pub fn signalled(&self) -> Vec<u32> {
        self.inner.lock().unwrap().signalled.clone()
    }
}

pub struct FakeInspector(pub Arc<ProcessTable>);

impl ProcessInspector for FakeInspector {
    fn inspect(&self, pid: u32) -> ProcessInfo {
        match self.0.inner.lock().unwrap().procs.get(&pid) {
            Some(cmdline) => ProcessInfo::running(cmdline.clone()),
            None => ProcessInfo::dead(),
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        let mut inner = self.0.inner.lock().unwrap();
        if inner.procs.remove(&pid).is_some() {
            inner.signalled.push(pid);
            true
        } else {
            false
        }
    }
}

/// Launches entries into the fake process table using the real ssh argv.
pub struct FakeLauncher {
    table: Arc<ProcessTable>,
    failing: Mutex<HashSet<u16>>,
    launches: Mutex<Vec<u16>>,
}

impl FakeLauncher {
    pub fn new(table: Arc<ProcessTable>) -> Arc<Self> {
        Arc::new(Self {
            table,
            failing: Mutex::new(HashSet::new()),
            launches: Mutex::new(vec![]),
        })
    }

    pub fn fail(&self, port: u16) {
        self.failing.lock().unwrap().insert(port);
    }

    pub fn succeed(&self, port: u16) {
        self.failing.lock().unwrap().remove(&port);
    }

    /// Ports of every successful launch, in order.
    pub fn launches(&self) -> Vec<u16> {
        self.launches.lock().unwrap().clone()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, target: &SshTarget, port: u16, log_path: &Path) -> Result<u32, LaunchError> {
        if self.failing.lock().unwrap().contains(&port) {
            return Err(LaunchError::SpawnFailed {
                port,
                source: io::Error::new(io::ErrorKind::NotFound, "ssh: command not found"),
            });
        }
        std::fs::write(log_path, format!("tunnel for port {port}\n")).map_err(|source| {
            LaunchError::LogFile {
                path: log_path.to_path_buf(),
                source,
            }
        })?;
        self.launches.lock().unwrap().push(port);
        Ok(self.table.spawn(target.command(port)))
    }
}

/// A temp record store wired to a fake process table.
pub struct Harness {
    pub dir: TempDir,
    pub store: RecordStore,
    pub table: Arc<ProcessTable>,
    pub launcher: Arc<FakeLauncher>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("state"));
        let table = ProcessTable::new();
        let launcher = FakeLauncher::new(table.clone());
        Self {
            dir,
            store,
            table,
            launcher,
        }
    }

    pub fn target() -> SshTarget {
        SshTarget::new("devbox.internal", 2222, "dev")
    }

    pub fn inspector(&self) -> Arc<dyn ProcessInspector> {
        Arc::new(FakeInspector(self.table.clone()))
    }

    pub fn supervisor(&self) -> Supervisor {
        self.supervisor_for(Self::target())
    }

    pub fn supervisor_for(&self, target: SshTarget) -> Supervisor {
        Supervisor::new(
            self.store.clone(),
            target,
            self.inspector(),
            self.launcher.clone(),
        )
    }

    /// Pid currently recorded for `port`.
    pub fn pid(&self, port: u16) -> Option<u32> {
        self.store.get_tunnel(port).unwrap().map(|r| r.pid)
    }
}

/// Runs the real binary against an isolated state directory.
pub struct TestEnv {
    temp_dir: TempDir,
    bin: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
            bin: PathBuf::from(env!("CARGO_BIN_EXE_tunnelkeeper")),
        }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    pub fn store(&self) -> RecordStore {
        RecordStore::new(self.state_dir())
    }

    pub fn run_command(&self, args: &[&str]) -> std::process::Output {
        self.run_command_with_env(args, &[])
    }

    pub fn run_command_with_env(
        &self,
        args: &[&str],
        extra_env: &[(&str, &str)],
    ) -> std::process::Output {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .env("TUNNELKEEPER_STATE_DIR", self.state_dir())
            .env("TUNNELKEEPER_CONFIG", self.temp_dir.path().join("config.toml"))
            .env("TUNNELKEEPER_LOG", "debug")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for var in [
            "SSH_HOST",
            "SSH_PORT",
            "SSH_USER",
            "SSH_PASSWORD",
            "PROXY_PORTS",
            "AUTO_REFRESH",
            "REFRESH_INTERVAL",
        ] {
            cmd.env_remove(var);
        }
        for (key, value) in extra_env {
            cmd.env(key, value);
        }
        cmd.output().unwrap()
    }

    pub fn write_config(&self, content: &str) {
        std::fs::write(self.temp_dir.path().join("config.toml"), content).unwrap();
    }
}

pub fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
