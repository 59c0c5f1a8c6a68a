//! Commands answered by the running daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use roomsync_protocol::{Request, Response};
use tracing::debug;

use crate::cli::{BlockAction, Cli, Command, SourceAction};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::output::{OutputFormat, render};
use crate::socket::SocketClient;

/// The request a daemon-backed command sends, or `None` for local commands.
pub fn request_for(command: &Command) -> Option<Request> {
    Some(match command {
        Command::Server | Command::Config { .. } => return None,
        Command::Stop => Request::Shutdown,
        Command::Status => Request::Status,
        Command::Availability => Request::GetAvailability,
        Command::Check { from, to } => Request::CheckAvailability {
            start: *from,
            end: *to,
        },
        Command::Export { .. } => Request::ExportCalendar,
        Command::Sync { source: None } => Request::SyncNow,
        Command::Sync { source: Some(id) } => Request::SyncSource { id: *id },
        Command::Interval { minutes: None } => Request::GetSyncInterval,
        Command::Interval {
            minutes: Some(minutes),
        } => Request::SetSyncInterval { minutes: *minutes },
        Command::Source { action } => match action {
            SourceAction::List => Request::ListSources,
            SourceAction::Add { name, url } => Request::AddSource {
                name: name.clone(),
                url: url.clone(),
            },
            SourceAction::Enable { id } => Request::SetSourceActive {
                id: *id,
                active: true,
            },
            SourceAction::Disable { id } => Request::SetSourceActive {
                id: *id,
                active: false,
            },
            SourceAction::Remove { id } => Request::RemoveSource { id: *id },
        },
        Command::Block { action } => match action {
            BlockAction::List { all } => Request::ListBlocks { all: *all },
            BlockAction::Add { start, end, reason } => Request::AddBlock {
                start: *start,
                end: *end,
                reason: reason.clone(),
            },
            BlockAction::Remove { id } => Request::RemoveBlock { id: *id },
        },
    })
}

/// The daemon socket: `--socket-path`, then config, then the default.
pub fn socket_path(cli: &Cli, config: &ClientConfig) -> PathBuf {
    cli.socket_path
        .clone()
        .or_else(|| config.server.socket_path.clone())
        .unwrap_or_else(roomsync_server::default_socket_path)
}

pub fn client(cli: &Cli, config: &ClientConfig) -> SocketClient {
    let timeout = cli.timeout.unwrap_or(config.server.timeout).max(1);
    SocketClient::new(socket_path(cli, config), Duration::from_secs(timeout))
}

/// Sends the command's request and prints the answer.
///
/// Returns `false` when `check` found the stay unavailable.
pub async fn run(cli: &Cli, config: &ClientConfig) -> ClientResult<bool> {
    let request = request_for(&cli.command).ok_or_else(|| {
        ClientError::UnexpectedResponse("command is not answered by the daemon".into())
    })?;
    debug!(request = request.kind(), "sending request");

    let response = client(cli, config).request(request).await?;

    if let (Command::Export { output: Some(path) }, Response::Calendar { ics }) =
        (&cli.command, &response)
    {
        write_calendar(path, ics).await?;
        return Ok(true);
    }

    let text = render(&response, OutputFormat::from_json_flag(cli.json))?;
    println!("{}", text);

    Ok(!matches!(
        response,
        Response::AvailabilityCheck {
            available: false,
            ..
        }
    ))
}

async fn write_calendar(path: &Path, ics: &str) -> ClientResult<()> {
    tokio::fs::write(path, ics).await?;
    println!("Wrote {}", path.display());
    Ok(())
}
