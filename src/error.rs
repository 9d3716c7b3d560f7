//! Custom diagnostic error types for rich error reporting via miette.
//!
//! Port specs, credentials, launches and the on-disk files each get their own
//! error enum so callers can decide which ones are fatal.

// False positive: fields are used in #[error] format strings and miette derive macros
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while parsing a port specification such as `8080,9000-9002`.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum PortSpecError {
    #[error("malformed port spec token '{token}': {reason}")]
    #[diagnostic(
        code(tunnelkeeper::ports::malformed),
        help("use single ports or ascending ranges separated by commas, e.g. 8080,9000-9005")
    )]
    MalformedPortSpec { token: String, reason: String },
}

impl PortSpecError {
    pub fn malformed(token: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPortSpec {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::MalformedPortSpec { token, .. } => token,
        }
    }
}

/// Errors about the SSH settings needed before anything is launched.
#[derive(Debug, Error, Diagnostic)]
pub enum CredentialError {
    #[error("password authentication requested but '{tool}' was not found in PATH")]
    #[diagnostic(
        code(tunnelkeeper::credentials::missing_tool),
        help(
            "install sshpass (e.g. `apt install sshpass` or `brew install hudochenkov/sshpass/sshpass`) or switch to key-based auth by unsetting SSH_PASSWORD"
        )
    )]
    MissingCredentialTool { tool: String },

    #[error("missing required SSH setting: {name}")]
    #[diagnostic(
        code(tunnelkeeper::credentials::missing_setting),
        help("pass --{flag}, set {name} in the environment, or add it to the [ssh] section of the config file")
    )]
    MissingSetting { name: String, flag: String },
}

/// Errors spawning a tunnel process.
#[derive(Debug, Error, Diagnostic)]
pub enum LaunchError {
    #[error("failed to spawn tunnel for port {port}: {source}")]
    #[diagnostic(
        code(tunnelkeeper::launch::spawn_failed),
        help("check that ssh is installed and the SSH host is reachable")
    )]
    SpawnFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("tunnel for port {port} exited before its pid could be captured")]
    #[diagnostic(
        code(tunnelkeeper::launch::exited_immediately),
        help("inspect the tunnel log for the ssh error message")
    )]
    ExitedImmediately { port: u16 },

    #[error("failed to open log file {}", path.display())]
    #[diagnostic(code(tunnelkeeper::launch::log_file))]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error for TOML configuration parse failures with source code highlighting.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse configuration")]
#[diagnostic(code(tunnelkeeper::config::parse_error))]
pub struct ConfigParseError {
    /// The source file contents for display
    #[source_code]
    pub src: NamedSource<String>,

    /// The location of the error in the source
    #[label("{message}")]
    pub span: SourceSpan,

    /// The error message from the TOML parser
    pub message: String,

    #[help]
    pub help: Option<String>,
}

impl ConfigParseError {
    pub fn from_toml_error(path: &std::path::Path, contents: String, err: toml::de::Error) -> Self {
        let message = err.message().to_string();
        let span = err
            .span()
            .map(|r| SourceSpan::from(r.start..r.end))
            .unwrap_or_else(|| SourceSpan::from(0..0));

        Self {
            src: NamedSource::new(path.display().to_string(), contents),
            span,
            message,
            help: Some("check TOML syntax at https://toml.io".to_string()),
        }
    }
}

/// Errors related to record and config files.
#[derive(Debug, Error, Diagnostic)]
pub enum FileError {
    #[error("failed to read file: {}", path.display())]
    #[diagnostic(code(tunnelkeeper::file::read_error))]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file: {}", path.display())]
    #[diagnostic(code(tunnelkeeper::file::write_error))]
    WriteError {
        path: PathBuf,
        #[help]
        details: Option<String>,
    },

    #[error("failed to parse record file: {}", path.display())]
    #[diagnostic(
        code(tunnelkeeper::file::corrupt_record),
        help("delete the file or run `tunnelkeeper stop` to reset tracked state")
    )]
    CorruptRecord {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
