//! On-disk record store for tunnels and the monitor.
//!
//! Layout under the store root:
//!
//! ```text
//! tunnels/<port>.toml   one record per tracked tunnel
//! monitor.toml          the monitor singleton
//! locks/<port>          per-port reconcile locks
//! logs/                 one log file per launch attempt, plus monitor logs
//! ```

use crate::error::FileError;
use crate::record::{MonitorRecord, TunnelRecord};
use crate::{Result, env};
use chrono::Local;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Handle to a record directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store for this host, rooted at `TUNNELKEEPER_STATE_DIR`.
    pub fn default_for_host() -> Self {
        Self::new(env::TUNNELKEEPER_STATE_DIR.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tunnels_dir(&self) -> PathBuf {
        self.root.join("tunnels")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn tunnel_path(&self, port: u16) -> PathBuf {
        self.tunnels_dir().join(format!("{port}.toml"))
    }

    fn monitor_path(&self) -> PathBuf {
        self.root.join("monitor.toml")
    }

    pub fn get_tunnel(&self, port: u16) -> Result<Option<TunnelRecord>> {
        read_record(&self.tunnel_path(port))
    }

    pub fn put_tunnel(&self, record: &TunnelRecord) -> Result<()> {
        write_record(&self.tunnel_path(record.port), record)
    }

    /// Returns true if a record was removed.
    pub fn remove_tunnel(&self, port: u16) -> Result<bool> {
        remove_record(&self.tunnel_path(port))
    }

    /// Ports with a record on disk, ascending.
    pub fn tunnel_ports(&self) -> Result<BTreeSet<u16>> {
        let dir = self.tunnels_dir();
        if !dir.exists() {
            return Ok(BTreeSet::new());
        }
        Ok(xx::file::ls(&dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u16>().ok())
            })
            .collect())
    }

    /// All tunnel records, ascending by port. Unreadable records are skipped
    /// with a warning so one corrupt file cannot hide the rest.
    pub fn tunnels(&self) -> Result<Vec<TunnelRecord>> {
        let mut records = vec![];
        for port in self.tunnel_ports()? {
            match self.get_tunnel(port) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!("skipping unreadable record for port {port}: {err}"),
            }
        }
        Ok(records)
    }

    pub fn get_monitor(&self) -> Result<Option<MonitorRecord>> {
        read_record(&self.monitor_path())
    }

    pub fn put_monitor(&self, record: &MonitorRecord) -> Result<()> {
        write_record(&self.monitor_path(), record)
    }

    pub fn remove_monitor(&self) -> Result<bool> {
        remove_record(&self.monitor_path())
    }

    /// Removes every tunnel record and the monitor record.
    pub fn clear(&self) -> Result<()> {
        let dir = self.tunnels_dir();
        if dir.exists() {
            for path in xx::file::ls(&dir)? {
                if path.extension().is_some_and(|ext| ext == "toml") {
                    remove_record(&path)?;
                }
            }
        }
        self.remove_monitor()?;
        Ok(())
    }

    /// Takes the exclusive lock for `port`. Both the one-shot start path and
    /// the monitor hold it while deciding and launching, so two callers never
    /// both restart the same dead tunnel. Dropping the guard releases it.
    pub fn lock_port(&self, port: u16) -> Result<impl Sized + use<>> {
        let dir = self.locks_dir();
        xx::file::mkdirp(&dir)?;
        Ok(xx::fslock::get(&dir.join(port.to_string()), false)?)
    }

    /// Lock guarding the monitor record while a monitor is replaced.
    pub fn lock_monitor(&self) -> Result<impl Sized + use<>> {
        let dir = self.locks_dir();
        xx::file::mkdirp(&dir)?;
        Ok(xx::fslock::get(&dir.join("monitor"), false)?)
    }

    /// A fresh, timestamped log path such as `logs/tunnel-8080-20240101-120000-123.log`.
    /// Every launch attempt gets its own file so output never interleaves.
    pub fn new_log_path(&self, prefix: &str) -> Result<PathBuf> {
        let dir = self.logs_dir();
        xx::file::mkdirp(&dir)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S-%3f");
        let mut path = dir.join(format!("{prefix}-{stamp}.log"));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{prefix}-{stamp}-{n}.log"));
            n += 1;
        }
        Ok(path)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = xx::file::read_to_string(path)?;
    let record = toml::from_str(&raw).map_err(|source| FileError::CorruptRecord {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(record))
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let raw = toml::to_string(record).map_err(|e| FileError::WriteError {
        path: path.to_path_buf(),
        details: Some(format!("serialization failed: {e}")),
    })?;
    if let Some(parent) = path.parent() {
        xx::file::mkdirp(parent)?;
    }
    // Write then rename so readers never observe a half-written record.
    let tmp = path.with_extension("toml.tmp");
    xx::file::write(&tmp, raw).map_err(|e| FileError::WriteError {
        path: path.to_path_buf(),
        details: Some(e.to_string()),
    })?;
    xx::file::mv(&tmp, path).map_err(|e| FileError::WriteError {
        path: path.to_path_buf(),
        details: Some(e.to_string()),
    })?;
    Ok(())
}

fn remove_record(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    match xx::file::remove_file(path) {
        Ok(()) => Ok(true),
        // removed by someone else in the meantime
        Err(_) if !path.exists() => Ok(false),
        Err(e) => Err(FileError::WriteError {
            path: path.to_path_buf(),
            details: Some(format!("could not remove record: {e}")),
        }
        .into()),
    }
}
