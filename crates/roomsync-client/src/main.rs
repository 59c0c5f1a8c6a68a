//! roomsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use roomsync_client::cli::{Cli, Command, ConfigAction};
use roomsync_client::commands;
use roomsync_client::config::ClientConfig;
use roomsync_client::error::{ClientError, ClientResult};
use roomsync_core::{TracingConfig, init_tracing};

/// Exit status of `check` when the stay is not available.
const EXIT_UNAVAILABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_UNAVAILABLE),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<bool> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);

    // `config path` must work even when the file does not parse
    if let Command::Config {
        action: ConfigAction::Path,
    } = cli.command
    {
        commands::config::path(&config_path)?;
        return Ok(true);
    }

    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
    .map_err(ClientError::Config)?;

    init_logging(&cli, &config);

    match &cli.command {
        Command::Server => commands::server::run(&cli, &config).await.map(|()| true),
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        }
        .map(|()| true),
        _ => commands::remote::run(&cli, &config).await,
    }
}

/// The daemon logs at info in its configured format; other commands stay
/// quiet unless `--debug` is given.
fn init_logging(cli: &Cli, config: &ClientConfig) {
    let tracing_config = match (&cli.command, cli.debug) {
        (Command::Server, debug) => {
            let level = if debug { Level::DEBUG } else { Level::INFO };
            TracingConfig::daemon()
                .with_format_name(&config.daemon.log_format)
                .with_level(level)
        }
        (_, true) => TracingConfig::cli_debug(),
        (_, false) => TracingConfig::cli(),
    };

    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }
}
