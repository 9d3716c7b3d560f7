use crate::Result;

mod run;
mod start;
mod stop;

/// Start or stop the background health monitor
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Monitor {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    #[clap(hide = true)]
    Run(run::Run),
    Start(start::Start),
    Stop(stop::Stop),
}

impl Monitor {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(run) => run.run().await,
            Commands::Start(start) => start.run().await,
            Commands::Stop(stop) => stop.run().await,
        }
    }
}
