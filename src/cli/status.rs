use crate::Result;
use crate::monitor::BackgroundMonitor;
use crate::procs::{ProcessInspector, Procs};
use crate::record::{MonitorRecord, TunnelRecord};
use crate::record_store::RecordStore;
use crate::ui::table::print_table;
use crate::verifier::{self, Identity};
use comfy_table::{Cell, ContentArrangement, Table};
use miette::IntoDiagnostic;
use std::sync::Arc;

/// Lists tracked tunnels and the health monitor
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "ls",
    verbatim_doc_comment,
    long_about = "\
Lists tracked tunnels and the health monitor

Every tracked pid is checked against the live process table: a tunnel is
healthy only if the pid is still an ssh process forwarding that port.

Examples:
  tunnelkeeper status
  tunnelkeeper ls --hide-header
  tunnelkeeper status --json

Output:
  Port  PID    State          Started              Log
  5432  40112  healthy        2026-03-02 09:14:51  ~/.local/state/...
  8080  40117  dead           2026-03-02 09:14:51  ~/.local/state/...
  monitor: running (pid 40120, every 60s)"
)]
pub struct Status {
    /// Print JSON instead of a table
    #[clap(long)]
    json: bool,
    /// Hide the table header row
    #[clap(long)]
    hide_header: bool,
}

#[derive(serde::Serialize)]
struct TunnelStatus {
    #[serde(flatten)]
    record: TunnelRecord,
    state: Identity,
}

#[derive(serde::Serialize)]
struct MonitorStatus {
    #[serde(flatten)]
    record: MonitorRecord,
    running: bool,
}

#[derive(serde::Serialize)]
struct StatusOutput {
    tunnels: Vec<TunnelStatus>,
    monitor: Option<MonitorStatus>,
}

impl Status {
    pub async fn run(&self) -> Result<()> {
        let output = tokio::task::spawn_blocking(collect)
            .await
            .into_diagnostic()??;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            return Ok(());
        }

        if output.tunnels.is_empty() {
            println!("no tunnels are tracked");
        } else {
            let mut table = Table::new();
            table
                .load_preset(comfy_table::presets::NOTHING)
                .set_content_arrangement(ContentArrangement::Dynamic);
            if !self.hide_header && console::user_attended() {
                table.set_header(vec!["Port", "PID", "State", "Started", "Log"]);
            }
            for tunnel in &output.tunnels {
                let record = &tunnel.record;
                table.add_row(vec![
                    Cell::new(record.port),
                    Cell::new(record.pid),
                    Cell::new(tunnel.state.style()),
                    Cell::new(
                        record
                            .started_at
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default(),
                    ),
                    Cell::new(record.log_path.display()),
                ]);
            }
            print_table(table)?;
        }

        match &output.monitor {
            Some(monitor) if monitor.running => {
                let every = monitor
                    .record
                    .interval_secs
                    .map(|secs| format!(", every {secs}s"))
                    .unwrap_or_default();
                println!("monitor: running (pid {}{every})", monitor.record.pid);
            }
            Some(monitor) => println!("monitor: dead (pid {})", monitor.record.pid),
            None => println!("monitor: not running"),
        }
        Ok(())
    }
}

fn collect() -> Result<StatusOutput> {
    let store = RecordStore::default_for_host();
    let inspector: Arc<dyn ProcessInspector> = Arc::new(Procs::new());
    let tunnels = store
        .tunnels()?
        .into_iter()
        .map(|record| TunnelStatus {
            state: verifier::verify_record(inspector.as_ref(), &record),
            record,
        })
        .collect();
    let monitor = BackgroundMonitor::new(store, inspector)
        .status()?
        .map(|(record, running)| MonitorStatus { record, running });
    Ok(StatusOutput { tunnels, monitor })
}
