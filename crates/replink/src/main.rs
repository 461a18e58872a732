mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = &cli.global;

    match cli.command {
        // Config commands don't need a server
        Command::Config(args) => commands::config_cmd::handle(&args, global),

        // Uploads run on their own HTTP exchange, outside the session
        Command::Upload(args) => {
            let resolved = config::resolve(global)?;
            commands::upload::handle(&args, &resolved.endpoint).await
        }

        // All other commands require a logged-in session
        Command::Printers => {
            let session = commands::connect(global).await?;
            commands::printers::handle(&session, global).await
        }
        Command::Watch(args) => {
            let session = commands::connect(global).await?;
            commands::watch::handle(&args, &session).await
        }
        Command::Send(args) => {
            let session = commands::connect(global).await?;
            commands::call::handle_send(&args, &session, global).await
        }
        Command::Call(args) => {
            let session = commands::connect(global).await?;
            commands::call::handle_call(&args, &session, global).await
        }
    }
}
