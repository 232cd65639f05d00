//! Entry point for the `vm-warden` binary.

use std::process::ExitCode;

use clap::Parser;
use warden_wrapper::{app, cli::Cli, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    match app::run(cli).await {
        Ok(exit) => ExitCode::from(u8::try_from(exit.code()).unwrap_or(1)),
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "vm-warden failed to start");
            ExitCode::FAILURE
        }
    }
}
