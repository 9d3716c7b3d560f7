//! Building and spawning ssh tunnel processes.

use crate::env;
use crate::error::{CredentialError, LaunchError};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

/// Where tunnels connect to and how they authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Extra `-o` style options passed verbatim before the forward.
    pub options: Vec<String>,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("options", &self.options)
            .finish()
    }
}

impl Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.destination(), self.port)
    }
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            options: vec![],
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// `user@host`, the literal ssh destination argument.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn uses_password(&self) -> bool {
        self.password.is_some()
    }

    /// Fails if password auth is requested but `sshpass` cannot be found.
    pub fn check_credentials(&self) -> Result<(), CredentialError> {
        if self.uses_password() && which::which(&*env::TUNNELKEEPER_SSHPASS_BIN).is_err() {
            return Err(CredentialError::MissingCredentialTool {
                tool: env::TUNNELKEEPER_SSHPASS_BIN.clone(),
            });
        }
        Ok(())
    }

    /// Full argv for the tunnel forwarding local `port` to the same remote port.
    /// The password is never part of the argv; it travels in `SSHPASS`.
    pub fn command(&self, port: u16) -> Vec<String> {
        let mut cmd = vec![];
        if self.uses_password() {
            cmd.push(env::TUNNELKEEPER_SSHPASS_BIN.clone());
            cmd.push("-e".to_string());
        }
        cmd.push(env::TUNNELKEEPER_SSH_BIN.clone());
        cmd.push("-N".to_string());
        for opt in [
            "ExitOnForwardFailure=yes",
            "ServerAliveInterval=30",
            "ServerAliveCountMax=3",
        ] {
            cmd.push("-o".to_string());
            cmd.push(opt.to_string());
        }
        if !self.uses_password() {
            // without a password helper, a prompt would hang forever
            cmd.push("-o".to_string());
            cmd.push("BatchMode=yes".to_string());
        }
        cmd.extend(self.options.iter().cloned());
        cmd.push("-p".to_string());
        cmd.push(self.port.to_string());
        cmd.push("-L".to_string());
        cmd.push(format!("{port}:localhost:{port}"));
        cmd.push(self.destination());
        cmd
    }
}

/// Starts tunnel processes. Launching is fire-and-forget: implementations
/// return the pid as soon as the process exists, without waiting for the
/// ssh session to come up.
pub trait Launcher: Send + Sync {
    fn launch(&self, target: &SshTarget, port: u16, log_path: &Path) -> Result<u32, LaunchError>;
}

/// Spawns real ssh processes, detached into their own process group so they
/// outlive the command that started them. Must be called inside a tokio
/// runtime, which reaps the children that exit while we are still around.
#[derive(Debug, Default)]
pub struct SshLauncher;

impl Launcher for SshLauncher {
    fn launch(&self, target: &SshTarget, port: u16, log_path: &Path) -> Result<u32, LaunchError> {
        let argv = target.command(port);
        let log_err = |source| LaunchError::LogFile {
            path: log_path.to_path_buf(),
            source,
        };
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(log_err)?;
        }
        let mut log = std::fs::File::options()
            .append(true)
            .create(true)
            .open(log_path)
            .map_err(log_err)?;
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(log, "{now} starting tunnel for port {port}: {}", shell_words::join(&argv))
            .map_err(log_err)?;
        let stderr = log.try_clone().map_err(log_err)?;

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref path) = *env::ORIGINAL_PATH {
            cmd.env("PATH", path);
        }
        if let Some(password) = &target.password {
            cmd.env("SSHPASS", password);
        }

        info!("starting tunnel for port {port} to {target}");
        let child = cmd
            .spawn()
            .map_err(|source| LaunchError::SpawnFailed { port, source })?;
        child.id().ok_or(LaunchError::ExitedImmediately { port })
    }
}
