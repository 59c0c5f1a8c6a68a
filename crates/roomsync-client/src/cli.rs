//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use roomsync_core::RecordId;

/// roomsync - room availability from your booking calendars
#[derive(Debug, Parser)]
#[command(name = "roomsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, env = "ROOMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Path to the daemon socket
    #[arg(long, global = true, env = "ROOMSYNC_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Print responses as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Server,

    /// Ask a running daemon to shut down
    Stop,

    /// Show daemon status and the last sync pass
    Status,

    /// List unavailable days from today on
    Availability,

    /// Check whether a stay is free
    Check {
        /// Check-in day (YYYY-MM-DD)
        from: NaiveDate,
        /// Check-out day (YYYY-MM-DD), exclusive
        to: NaiveDate,
    },

    /// Export the availability calendar as iCalendar
    Export {
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Sync calendar feeds now
    Sync {
        /// Sync only this source
        #[arg(long)]
        source: Option<RecordId>,
    },

    /// Show or set the background sync interval
    Interval {
        /// New interval in minutes
        minutes: Option<u64>,
    },

    /// Manage calendar sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage manual blocks
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Calendar source actions.
#[derive(Debug, Subcommand)]
pub enum SourceAction {
    /// List sources
    List,
    /// Add a feed
    Add {
        /// Display name, also the label of synced ranges
        name: String,
        /// iCalendar feed URL
        url: String,
    },
    /// Enable a source
    Enable { id: RecordId },
    /// Disable a source; its ranges stop counting
    Disable { id: RecordId },
    /// Remove a source and its synced ranges
    Remove { id: RecordId },
}

/// Manual block actions.
#[derive(Debug, Subcommand)]
pub enum BlockAction {
    /// List blocked ranges
    List {
        /// Include ranges that already ended
        #[arg(long)]
        all: bool,
    },
    /// Block days by hand
    Add {
        /// First blocked day (YYYY-MM-DD)
        start: NaiveDate,
        /// Last blocked day (YYYY-MM-DD), inclusive
        end: NaiveDate,
        /// Why the room is unavailable
        #[arg(long, short)]
        reason: String,
    },
    /// Remove a manual block
    Remove { id: RecordId },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
