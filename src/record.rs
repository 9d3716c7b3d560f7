use chrono::{DateTime, Local};
use std::fmt::Display;
use std::path::PathBuf;

/// Bookkeeping for one tunnel process, keyed by its forwarded port.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TunnelRecord {
    pub port: u16,
    pub pid: u32,
    pub log_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
}

impl TunnelRecord {
    pub fn new(port: u16, pid: u32, log_path: PathBuf) -> Self {
        Self {
            port,
            pid,
            log_path,
            endpoint: None,
            started_at: Some(Local::now()),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The `user@host` part of the recorded `user@host:port` endpoint.
    pub fn destination(&self) -> Option<&str> {
        let endpoint = self.endpoint.as_deref()?;
        Some(endpoint.rsplit_once(':').map_or(endpoint, |(dest, _)| dest))
    }
}

impl Display for TunnelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {} (pid {})", self.port, self.pid)
    }
}

/// The singleton record of the background health monitor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MonitorRecord {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
}

impl MonitorRecord {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            interval_secs: None,
            log_path: None,
            started_at: Some(Local::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_from_endpoint() {
        let record = TunnelRecord::new(80, 1, PathBuf::from("a.log"));
        assert_eq!(record.destination(), None);
        let record = record.with_endpoint("dev@example.com:2222");
        assert_eq!(record.destination(), Some("dev@example.com"));
        let record = TunnelRecord::new(80, 1, PathBuf::from("a.log")).with_endpoint("dev@::1:22");
        assert_eq!(record.destination(), Some("dev@::1"));
    }

    #[test]
    fn test_toml_round_trip_keeps_optional_fields_out() {
        let mut record = TunnelRecord::new(8080, 42, PathBuf::from("/logs/t.log"));
        record.started_at = None;
        let raw = toml::to_string(&record).unwrap();
        assert!(!raw.contains("endpoint"));
        assert!(!raw.contains("started_at"));
        let back: TunnelRecord = toml::from_str(&raw).unwrap();
        assert_eq!(back, record);
    }
}
