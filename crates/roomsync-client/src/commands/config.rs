//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the effective configuration to stdout.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration, reporting every problem at once.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    let problems = config.validate();
    if problems.is_empty() {
        println!("Configuration is valid.");
        return Ok(());
    }
    for problem in &problems {
        eprintln!("  {}", problem);
    }
    Err(ClientError::Config(format!(
        "{} problem(s) found",
        problems.len()
    )))
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
