//! Log output for the daemon and the CLI.
//!
//! `RUST_LOG` wins over the configured level. Without it, roomsync crates
//! log at the configured level and HTTP internals at `warn`.

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid log filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for TracingOutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// How logs are filtered and printed.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for roomsync crates when `RUST_LOG` is unset.
    pub level: Level,
    pub format: TracingOutputFormat,
    /// Print source file and line.
    pub location: bool,
    pub timestamps: bool,
    /// Log span open/close, which shows request durations.
    pub span_events: bool,
    /// Full filter directive; replaces `level` and ignores `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingOutputFormat::Pretty,
            location: false,
            timestamps: true,
            span_events: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Quiet one-line output for CLI commands.
    #[must_use]
    pub fn cli() -> Self {
        Self {
            level: Level::WARN,
            format: TracingOutputFormat::Compact,
            timestamps: false,
            ..Self::default()
        }
    }

    /// CLI output with `--debug`.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            location: true,
            ..Self::cli()
        }
    }

    /// Structured output for the daemon.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            format: TracingOutputFormat::Json,
            location: true,
            span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Picks the format by name; unknown names fall back to pretty.
    #[must_use]
    pub fn with_format_name(self, name: &str) -> Self {
        self.with_format(name.parse().unwrap_or_default())
    }

    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// The filter directive used when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        self.filter.clone().unwrap_or_else(|| {
            format!(
                "roomsync={},hyper=warn,reqwest=warn,rustls=warn",
                self.level
            )
        })
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a subscriber is already installed or the configured filter
/// does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = match &config.filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.directive())),
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn fmt_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_file(config.location)
        .with_line_number(config.location)
        .with_span_events(span_events);

    match (config.format, config.timestamps) {
        (TracingOutputFormat::Pretty, _) => layer.pretty().boxed(),
        (TracingOutputFormat::Compact, true) => layer.compact().boxed(),
        (TracingOutputFormat::Compact, false) => layer.compact().without_time().boxed(),
        (TracingOutputFormat::Json, _) => layer.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let cli = TracingConfig::cli();
        assert_eq!(cli.level, Level::WARN);
        assert_eq!(cli.format, TracingOutputFormat::Compact);
        assert!(!cli.timestamps);

        let debug = TracingConfig::cli_debug();
        assert_eq!(debug.level, Level::DEBUG);
        assert!(debug.location);
        assert!(!debug.timestamps);

        let daemon = TracingConfig::daemon();
        assert_eq!(daemon.level, Level::INFO);
        assert_eq!(daemon.format, TracingOutputFormat::Json);
        assert!(daemon.span_events);
    }

    #[test]
    fn format_names() {
        assert_eq!("JSON".parse(), Ok(TracingOutputFormat::Json));
        assert_eq!(" compact ".parse(), Ok(TracingOutputFormat::Compact));
        assert!("xml".parse::<TracingOutputFormat>().is_err());

        let config = TracingConfig::daemon().with_format_name("whatever");
        assert_eq!(config.format, TracingOutputFormat::Pretty);
    }

    #[test]
    fn directive_quiets_http_internals() {
        let directive = TracingConfig::default().with_level(Level::DEBUG).directive();
        assert_eq!(directive, "roomsync=DEBUG,hyper=warn,reqwest=warn,rustls=warn");
    }

    #[test]
    fn explicit_filter_replaces_level() {
        let config = TracingConfig::cli().with_env_filter("roomsync_server=trace");
        assert_eq!(config.directive(), "roomsync_server=trace");
    }
}
