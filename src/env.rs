use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;

pub static TUNNELKEEPER_BIN: Lazy<PathBuf> = Lazy::new(|| {
    current_exe()
        .and_then(|p| p.canonicalize())
        .unwrap_or_else(|e| {
            eprintln!("Warning: Could not determine tunnelkeeper binary path: {e}");
            args()
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tunnelkeeper"))
        })
});

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir().unwrap_or_else(|| {
        eprintln!("Warning: Could not determine home directory");
        PathBuf::from("/tmp")
    })
});

pub static HOSTNAME: Lazy<String> =
    Lazy::new(|| sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string()));

pub static TUNNELKEEPER_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("TUNNELKEEPER_CONFIG_DIR").unwrap_or(HOME_DIR.join(".config").join("tunnelkeeper"))
});
pub static TUNNELKEEPER_CONFIG_FILE: Lazy<PathBuf> = Lazy::new(|| {
    var_path("TUNNELKEEPER_CONFIG").unwrap_or(TUNNELKEEPER_CONFIG_DIR.join("config.toml"))
});

// Records are kept per host so a shared home directory never mixes pids
// from different process tables.
pub static TUNNELKEEPER_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("TUNNELKEEPER_STATE_DIR").unwrap_or(
        dirs::state_dir()
            .unwrap_or(HOME_DIR.join(".local").join("state"))
            .join("tunnelkeeper")
            .join(&*HOSTNAME),
    )
});

pub static TUNNELKEEPER_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("TUNNELKEEPER_LOG").unwrap_or(log::LevelFilter::Info));

pub static TUNNELKEEPER_SSH_BIN: Lazy<String> =
    Lazy::new(|| var("TUNNELKEEPER_SSH_BIN").unwrap_or_else(|_| "ssh".to_string()));
pub static TUNNELKEEPER_SSHPASS_BIN: Lazy<String> =
    Lazy::new(|| var("TUNNELKEEPER_SSHPASS_BIN").unwrap_or_else(|_| "sshpass".to_string()));

// Capture the PATH at startup so tunnels can find ssh/sshpass
pub static ORIGINAL_PATH: Lazy<Option<String>> = Lazy::new(|| var("PATH").ok());

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}

/// Accepts the usual spellings of a boolean flag in the environment.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
