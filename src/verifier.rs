//! Process identity verification.
//!
//! A recorded pid is only trusted if the live process behind it is still an
//! ssh tunnel forwarding the recorded port to the expected destination. Pids
//! get recycled, so "the process exists" is never enough.

use crate::procs::{ProcessInfo, ProcessInspector};
use crate::record::TunnelRecord;
use std::path::Path;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// The pid is a live tunnel for the port.
    Healthy,
    /// The pid is alive but belongs to something else.
    WrongProcess,
    /// No such process.
    Dead,
}

impl Identity {
    pub fn style(&self) -> String {
        let s = self.to_string();
        match self {
            Identity::Healthy => console::style(s).green().to_string(),
            Identity::WrongProcess => console::style(s).yellow().to_string(),
            Identity::Dead => console::style(s).red().to_string(),
        }
    }
}

/// Classifies `pid` against the tunnel expected for `port` to `destination`
/// (`user@host`). Always asks the inspector; never trusts earlier answers.
pub fn verify(
    inspector: &dyn ProcessInspector,
    pid: u32,
    port: u16,
    destination: &str,
) -> Identity {
    classify(&inspector.inspect(pid), port, destination)
}

/// Classifies a record against the endpoint it was launched for. Records
/// without an endpoint match any ssh tunnel forwarding their port.
pub fn verify_record(inspector: &dyn ProcessInspector, record: &TunnelRecord) -> Identity {
    let info = inspector.inspect(record.pid);
    match record.destination() {
        Some(destination) => classify(&info, record.port, destination),
        None => {
            let destination = info.cmdline.last().cloned().unwrap_or_default();
            classify(&info, record.port, &destination)
        }
    }
}

pub fn classify(info: &ProcessInfo, port: u16, destination: &str) -> Identity {
    if !info.exists {
        Identity::Dead
    } else if is_tunnel_for(&info.cmdline, port, destination) {
        Identity::Healthy
    } else {
        Identity::WrongProcess
    }
}

/// True if `cmdline` is an ssh invocation (optionally wrapped in sshpass)
/// with a local forward listening on `port` and `destination` as its target.
pub fn is_tunnel_for(cmdline: &[String], port: u16, destination: &str) -> bool {
    let Some(ssh_args) = ssh_args(cmdline) else {
        return false;
    };
    let forwards_port = local_forwards(ssh_args).any(|spec| forward_listen_port(spec) == Some(port));
    forwards_port && ssh_args.iter().any(|arg| arg == destination)
}

/// The arguments after the `ssh` program, looking through an `sshpass` wrapper.
fn ssh_args(cmdline: &[String]) -> Option<&[String]> {
    let (program, rest) = cmdline.split_first()?;
    match program_name(program) {
        "ssh" => Some(rest),
        "sshpass" => {
            let idx = rest.iter().position(|arg| program_name(arg) == "ssh")?;
            Some(&rest[idx + 1..])
        }
        _ => None,
    }
}

fn program_name(arg: &str) -> &str {
    Path::new(arg)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(arg)
}

/// Forward specs given via `-L spec` or `-Lspec`.
fn local_forwards(args: &[String]) -> impl Iterator<Item = &str> {
    args.iter().enumerate().filter_map(|(i, arg)| {
        if arg == "-L" {
            args.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix("-L").filter(|s| !s.is_empty())
        }
    })
}

/// Listen port of `[bind_address:]port:host:hostport`.
fn forward_listen_port(spec: &str) -> Option<u16> {
    let parts: Vec<&str> = spec.split(':').collect();
    let port = match parts.len() {
        3 => parts[0],
        4 => parts[1],
        _ => return None,
    };
    port.parse().ok()
}
