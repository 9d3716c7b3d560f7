#[macro_use]
extern crate log;

mod cli;
mod config;
mod env;
mod error;
mod logger;
mod monitor;
mod port_spec;
mod procs;
mod record;
mod record_store;
mod supervisor;
mod teardown;
mod tunnel;
mod ui;
mod verifier;

pub use miette::Result;
#[cfg(unix)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    #[cfg(unix)]
    handle_epipe();
    cli::run().await
}

// keep `tunnelkeeper status | head` from dying on a closed pipe
#[cfg(unix)]
fn handle_epipe() {
    match signal::unix::signal(SignalKind::pipe()) {
        Ok(mut pipe_stream) => {
            tokio::spawn(async move {
                pipe_stream.recv().await;
                debug!("received SIGPIPE");
            });
        }
        Err(e) => {
            warn!("Could not set up SIGPIPE handler: {e}");
        }
    }
}
