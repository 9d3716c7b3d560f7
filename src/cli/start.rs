use crate::cli::{SshArgs, print_report};
use crate::config::{self, ConfigFile};
use crate::monitor::{BackgroundMonitor, MonitorOptions};
use crate::procs::Procs;
use crate::{Result, port_spec};
use miette::{IntoDiagnostic, bail, ensure};
use std::sync::Arc;

/// Starts a tunnel for every port in a port spec
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "start-tunnels",
    verbatim_doc_comment,
    long_about = "\
Starts a tunnel for every port in a port spec

Each port is forwarded from localhost to the same port on the remote side
of the SSH server. Ports that already have a healthy tunnel are left alone;
tunnels that died or whose pid now belongs to another process are replaced.

Examples:
  tunnelkeeper start 8080                        One port
  tunnelkeeper start 3000,5432,8080-8085         Lists and ranges
  tunnelkeeper start 8080 --ssh-host dev.internal --ssh-user dev
  PROXY_PORTS=8080-8082 tunnelkeeper start       Ports from the environment
  tunnelkeeper start 8080 --auto-refresh         Keep them alive in the background
  tunnelkeeper start 8080 -a --interval 2m       Check every two minutes

Output:
  port 8080: started (pid 41233)
  port 8081: skipped (pid 40112 still healthy)"
)]
pub struct Start {
    /// Ports to forward, e.g. "8080,8081,9000-9005"
    #[clap(env = "PROXY_PORTS")]
    ports: Option<String>,
    #[clap(flatten)]
    ssh: SshArgs,
    /// Keep the tunnels alive with a background health monitor
    #[clap(short, long)]
    auto_refresh: bool,
    /// Time between health checks, in seconds or as a duration like "2m" [default: 60]
    #[clap(long, env = "REFRESH_INTERVAL")]
    interval: Option<String>,
}

impl Start {
    pub async fn run(&self) -> Result<()> {
        let file = ConfigFile::load()?;
        let Some(spec) = config::resolve_ports(self.ports.as_deref(), &file) else {
            bail!("no ports given: pass a port spec or set PROXY_PORTS");
        };
        let ports = port_spec::parse(&spec)?;
        ensure!(!ports.is_empty(), "port spec '{spec}' does not name any ports");
        let target = config::resolve_target(&self.ssh.overrides(), &file)?;
        target.check_credentials()?;
        let auto_refresh = config::resolve_auto_refresh(self.auto_refresh, &file);
        let interval = config::resolve_interval(self.interval.as_deref(), &file)?;

        debug!("reconciling {ports} through {target}");
        let supervisor = super::supervisor(target.clone());
        let report = {
            let supervisor = supervisor.clone();
            let ports = ports.ascending();
            tokio::task::spawn_blocking(move || supervisor.reconcile(ports))
                .await
                .into_diagnostic()?
        };
        print_report(&report);

        if auto_refresh {
            let background =
                BackgroundMonitor::new(supervisor.store().clone(), Arc::new(Procs::new()));
            let opts = MonitorOptions { target, interval };
            let record = tokio::task::spawn_blocking(move || background.start(&opts))
                .await
                .into_diagnostic()??;
            println!(
                "monitor: running (pid {}), checking every {}",
                record.pid,
                humantime::format_duration(interval)
            );
        }

        let failed = report.failures().count();
        ensure!(
            failed == 0,
            "{failed} of {} tunnels failed to launch",
            report.ports.len()
        );
        Ok(())
    }
}
