use crate::Result;
use crate::cli::{SshArgs, print_report};
use crate::config::{self, ConfigFile};
use miette::{IntoDiagnostic, ensure};

/// Runs one health check over the tracked tunnels
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Runs one health check over the tracked tunnels

Does what a single monitor cycle does: every tracked port is verified and
tunnels that died or were replaced are started again. Useful from cron
when a long-running monitor is not wanted.

Example:
  */5 * * * * tunnelkeeper reconcile --ssh-host dev.internal --ssh-user dev"
)]
pub struct Reconcile {
    #[clap(flatten)]
    ssh: SshArgs,
}

impl Reconcile {
    pub async fn run(&self) -> Result<()> {
        let file = ConfigFile::load()?;
        let target = config::resolve_target(&self.ssh.overrides(), &file)?;
        target.check_credentials()?;

        let supervisor = super::supervisor(target);
        let report = tokio::task::spawn_blocking(move || supervisor.reconcile_tracked())
            .await
            .into_diagnostic()??;
        if report.is_empty() {
            println!("no tunnels are tracked");
        }
        print_report(&report);
        ensure!(
            !report.has_failures(),
            "{} tunnels failed to launch",
            report.failures().count()
        );
        Ok(())
    }
}
