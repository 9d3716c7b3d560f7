//! Configuration file and setting resolution.
//!
//! Settings resolve in this order (highest first):
//! 1. Command line flags
//! 2. Environment variables (`SSH_HOST`, `PROXY_PORTS`, `AUTO_REFRESH`, ...)
//! 3. The config file (`$TUNNELKEEPER_CONFIG`, default `~/.config/tunnelkeeper/config.toml`)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [ssh]
//! host = "devbox.internal"
//! port = 2222
//! user = "dev"
//! options = ["-i", "/home/dev/.ssh/devbox"]
//!
//! [tunnels]
//! ports = "3000,5432,8080-8085"
//! auto_refresh = true
//! refresh_interval = "2m"
//! ```

use crate::error::{ConfigParseError, CredentialError, FileError};
use crate::monitor::DEFAULT_INTERVAL;
use crate::tunnel::SshTarget;
use crate::{Result, env};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub tunnels: TunnelsSection,
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelsSection {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ports: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auto_refresh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub refresh_interval: Option<IntervalValue>,
}

/// `refresh_interval = 90` or `refresh_interval = "90s"`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum IntervalValue {
    Seconds(u64),
    Human(String),
}

impl ConfigFile {
    /// Reads the config file at `path`; a missing file is an empty config.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self {
                path: Some(path.to_path_buf()),
                ..Default::default()
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| FileError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|e| ConfigParseError::from_toml_error(path, raw.clone(), e))?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn load() -> Result<Self> {
        Self::read(&*env::TUNNELKEEPER_CONFIG_FILE)
    }

    /// Interval from the file, if set and valid.
    pub fn refresh_interval(&self) -> Result<Option<Duration>> {
        match &self.tunnels.refresh_interval {
            None => Ok(None),
            Some(IntervalValue::Seconds(secs)) => parse_interval(&secs.to_string()).map(Some),
            Some(IntervalValue::Human(s)) => parse_interval(s).map(Some),
        }
    }
}

/// SSH settings as given on the command line or in the environment.
#[derive(Debug, Default, Clone)]
pub struct SshOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub options: Vec<String>,
}

/// Merges overrides over the config file into a complete target.
pub fn resolve_target(overrides: &SshOverrides, file: &ConfigFile) -> Result<SshTarget> {
    let host = overrides
        .host
        .clone()
        .or_else(|| file.ssh.host.clone())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CredentialError::MissingSetting {
            name: "SSH_HOST".to_string(),
            flag: "ssh-host".to_string(),
        })?;
    let user = overrides
        .user
        .clone()
        .or_else(|| file.ssh.user.clone())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CredentialError::MissingSetting {
            name: "SSH_USER".to_string(),
            flag: "ssh-user".to_string(),
        })?;
    let port = overrides
        .port
        .or(file.ssh.port)
        .unwrap_or(DEFAULT_SSH_PORT);
    let password = overrides
        .password
        .clone()
        .or_else(|| file.ssh.password.clone());
    let options = if overrides.options.is_empty() {
        file.ssh.options.clone()
    } else {
        overrides.options.clone()
    };

    let mut target = SshTarget::new(host, port, user).with_password(password);
    target.options = options;
    Ok(target)
}

/// Flag, then `AUTO_REFRESH`, then the file, then off.
pub fn resolve_auto_refresh(flag: bool, file: &ConfigFile) -> bool {
    if flag {
        return true;
    }
    if let Ok(raw) = env::var("AUTO_REFRESH") {
        match env::parse_bool(&raw) {
            Some(value) => return value,
            None => warn!("ignoring AUTO_REFRESH={raw:?}: expected true or false"),
        }
    }
    file.tunnels.auto_refresh.unwrap_or(false)
}

/// Flag or `REFRESH_INTERVAL` (clap merges those two), then the file, then 60s.
pub fn resolve_interval(flag: Option<&str>, file: &ConfigFile) -> Result<Duration> {
    match flag {
        Some(raw) => parse_interval(raw),
        None => Ok(file.refresh_interval()?.unwrap_or(DEFAULT_INTERVAL)),
    }
}

/// Flag or `PROXY_PORTS`, then the file.
pub fn resolve_ports(flag: Option<&str>, file: &ConfigFile) -> Option<String> {
    flag.map(str::to_string).or_else(|| file.tunnels.ports.clone())
}

/// Plain integers are seconds; anything else goes through humantime (`90s`, `2m`).
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let duration = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw)
            .map_err(|e| miette::miette!("invalid refresh interval '{raw}': {e}"))?,
    };
    if duration.is_zero() {
        miette::bail!("refresh interval must be greater than zero");
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("1500ms").unwrap(), Duration::from_millis(1500));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::read(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.ssh, SshSection::default());
        assert!(config.tunnels.ports.is_none());
    }

    #[test]
    fn test_read_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[ssh]
host = "devbox"
port = 2222
user = "dev"
options = ["-i", "/keys/devbox"]

[tunnels]
ports = "3000,8080-8081"
auto_refresh = true
refresh_interval = 90
"#,
        )
        .unwrap();

        let config = ConfigFile::read(&path).unwrap();
        assert_eq!(config.ssh.host.as_deref(), Some("devbox"));
        assert_eq!(config.ssh.port, Some(2222));
        assert_eq!(config.ssh.options, vec!["-i", "/keys/devbox"]);
        assert_eq!(config.tunnels.auto_refresh, Some(true));
        assert_eq!(
            config.refresh_interval().unwrap(),
            Some(Duration::from_secs(90))
        );
        assert_eq!(config.path, Some(path));
    }

    #[test]
    fn test_humantime_interval_in_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tunnels]\nrefresh_interval = \"5m\"\n").unwrap();
        let config = ConfigFile::read(&path).unwrap();
        assert_eq!(
            resolve_interval(None, &config).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            resolve_interval(Some("10"), &config).unwrap(),
            Duration::from_secs(10)
        );
        assert_eq!(
            resolve_interval(None, &ConfigFile::default()).unwrap(),
            DEFAULT_INTERVAL
        );
    }

    #[test]
    fn test_bad_config_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ssh]\nhost = \n").unwrap();
        let err = ConfigFile::read(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));

        std::fs::write(&path, "[ssh]\nhots = \"typo\"\n").unwrap();
        assert!(ConfigFile::read(&path).is_err());
    }

    #[test]
    fn test_resolve_target_precedence() {
        let file = ConfigFile {
            ssh: SshSection {
                host: Some("file-host".into()),
                port: Some(2200),
                user: Some("file-user".into()),
                password: None,
                options: vec!["-v".into()],
            },
            ..Default::default()
        };
        let overrides = SshOverrides {
            host: Some("cli-host".into()),
            ..Default::default()
        };
        let target = resolve_target(&overrides, &file).unwrap();
        assert_eq!(target.host, "cli-host");
        assert_eq!(target.user, "file-user");
        assert_eq!(target.port, 2200);
        assert_eq!(target.options, vec!["-v"]);
        assert!(!target.uses_password());
    }

    #[test]
    fn test_resolve_target_defaults_and_missing() {
        let overrides = SshOverrides {
            host: Some("h".into()),
            user: Some("u".into()),
            ..Default::default()
        };
        let target = resolve_target(&overrides, &ConfigFile::default()).unwrap();
        assert_eq!(target.port, DEFAULT_SSH_PORT);

        let err = resolve_target(&SshOverrides::default(), &ConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("SSH_HOST"));

        let no_user = SshOverrides {
            host: Some("h".into()),
            ..Default::default()
        };
        let err = resolve_target(&no_user, &ConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("SSH_USER"));
    }

    #[test]
    fn test_resolve_ports() {
        let file = ConfigFile {
            tunnels: TunnelsSection {
                ports: Some("80".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(resolve_ports(Some("443"), &file).as_deref(), Some("443"));
        assert_eq!(resolve_ports(None, &file).as_deref(), Some("80"));
        assert_eq!(resolve_ports(None, &ConfigFile::default()), None);
    }
}
