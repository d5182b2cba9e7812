mod aggregate;
mod cli;
mod dispatch;
mod error;
mod fmt;
mod index;
mod models;
mod parser;
mod scoring;
mod session;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigCommands};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "txlens=info",
        _ => "txlens=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Lookup { file, id } => cli::lookup::run(&file, &id),
        Commands::Stats { file, id } => cli::stats::run(&file, &id),
        Commands::Predict { file, id, endpoint } => {
            cli::predict::run(&file, &id, endpoint.as_deref()).await
        }
        Commands::Shell { file, endpoint } => {
            cli::shell::run(file.as_deref(), endpoint.as_deref()).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => cli::config::show(),
            ConfigCommands::SetEndpoint { url } => cli::config::set_endpoint(&url),
            ConfigCommands::SetDelimiter { delimiter } => cli::config::set_delimiter(&delimiter),
            ConfigCommands::SetMaxInFlight { limit } => cli::config::set_max_in_flight(limit),
            ConfigCommands::SetTimeout { secs } => cli::config::set_timeout(secs),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
