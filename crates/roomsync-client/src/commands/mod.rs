//! Subcommand implementations.

pub mod config;
pub mod remote;
pub mod server;
