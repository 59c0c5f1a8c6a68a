//! CLI, socket client and output rendering.
//!
//! This crate provides the `roomsync` command-line interface. `roomsync server`
//! runs the daemon; every other command talks to it over the Unix socket.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod socket;

pub use cli::Cli;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use output::{OutputFormat, render};
pub use socket::SocketClient;
