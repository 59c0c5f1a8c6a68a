//! Client and daemon configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/roomsync/config.toml` by default. Every section and field is
//! optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use roomsync_core::{
    DEFAULT_DISPLAY_TIMEZONE, DEFAULT_SYNC_INTERVAL_MINUTES, DisplayZone, ExportOptions,
    MAX_SYNC_INTERVAL_MINUTES, MIN_SYNC_INTERVAL_MINUTES, TracingOutputFormat,
};
use roomsync_providers::FetcherConfig;
use roomsync_server::{AggregatorConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};

/// Configuration for the roomsync CLI and daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Socket/connection settings.
    pub server: ServerSettings,

    /// Daemon settings.
    pub daemon: DaemonSettings,

    /// Calendar export settings.
    pub export: ExportOptions,
}

/// Socket/connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Path to the daemon socket.
    pub socket_path: Option<PathBuf>,

    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout: 30,
        }
    }
}

/// Settings read by `roomsync server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// JSON snapshot of the store. Defaults to the user data directory.
    pub state_path: Option<PathBuf>,

    /// IANA timezone that defines a "day".
    pub display_timezone: String,

    /// Sync interval used until one is stored.
    pub default_interval_minutes: u64,

    /// Run the periodic sync. When off, feeds are read on demand.
    pub background_sync: bool,

    /// How long availability results and live feeds are reused, in seconds.
    pub cache_ttl_secs: u64,

    /// Per-request feed timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// User-Agent sent to feed hosts.
    pub user_agent: Option<String>,

    /// Sources fetched at once during a pass.
    pub fetch_concurrency: usize,

    /// Log output: `pretty`, `compact` or `json`.
    pub log_format: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            state_path: None,
            display_timezone: DEFAULT_DISPLAY_TIMEZONE.to_string(),
            default_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            background_sync: true,
            cache_ttl_secs: 300,
            fetch_timeout_secs: FetcherConfig::DEFAULT_TIMEOUT_SECS,
            user_agent: None,
            fetch_concurrency: 4,
            log_format: "pretty".to_string(),
        }
    }
}

impl DaemonSettings {
    /// The configured display timezone.
    pub fn zone(&self) -> Result<DisplayZone, String> {
        self.display_timezone.parse().map_err(|e| format!("{e}"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| ClientConfig::default_data_dir().join("state.json"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        let config =
            FetcherConfig::default().with_timeout(Duration::from_secs(self.fetch_timeout_secs));
        match &self.user_agent {
            Some(agent) => config.with_user_agent(agent),
            None => config,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_default_interval(self.default_interval_minutes)
            .with_concurrency(self.fetch_concurrency)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::default()
            .with_live_feeds(!self.background_sync)
            .with_feed_ttl(self.cache_ttl())
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    /// Lists every problem in the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let daemon = &self.daemon;

        if let Err(e) = daemon.zone() {
            problems.push(format!("daemon.display_timezone: {e}"));
        }
        if !(MIN_SYNC_INTERVAL_MINUTES..=MAX_SYNC_INTERVAL_MINUTES)
            .contains(&daemon.default_interval_minutes)
        {
            problems.push(format!(
                "daemon.default_interval_minutes must be between {MIN_SYNC_INTERVAL_MINUTES} \
                 and {MAX_SYNC_INTERVAL_MINUTES}"
            ));
        }
        if daemon.fetch_timeout_secs == 0 {
            problems.push("daemon.fetch_timeout_secs must be positive".to_string());
        }
        if daemon.fetch_concurrency == 0 {
            problems.push("daemon.fetch_concurrency must be positive".to_string());
        }
        if let Err(e) = daemon.log_format.parse::<TracingOutputFormat>() {
            problems.push(format!("daemon.log_format: {e}"));
        }
        if self.server.timeout == 0 {
            problems.push("server.timeout must be positive".to_string());
        }
        if self.export.uid_domain.trim().is_empty() {
            problems.push("export.uid_domain must not be empty".to_string());
        }
        problems
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roomsync")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roomsync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.timeout, 30);
        assert_eq!(config.daemon.display_timezone, "Asia/Manila");
        assert_eq!(config.daemon.default_interval_minutes, 5);
        assert!(config.daemon.background_sync);
        assert_eq!(config.export, ExportOptions::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
[daemon]
display_timezone = "Europe/Paris"
background_sync = false
cache_ttl_secs = 60

[export]
calendar_name = "Beach house"
"#,
        )
        .unwrap();

        assert_eq!(config.daemon.zone().unwrap().name(), "Europe/Paris");
        assert_eq!(config.daemon.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.daemon.fetch_concurrency, 4);
        assert_eq!(config.export.calendar_name, "Beach house");
        assert!(config.export.include_external);

        let aggregator = config.daemon.aggregator_config();
        assert!(aggregator.live_feeds);
        assert_eq!(aggregator.feed_ttl, Duration::from_secs(60));
    }

    #[test]
    fn runtime_configs_follow_settings() {
        let daemon = DaemonSettings {
            fetch_timeout_secs: 7,
            user_agent: Some("roomsync-test".into()),
            default_interval_minutes: 12,
            fetch_concurrency: 2,
            ..Default::default()
        };

        let fetcher = daemon.fetcher_config();
        assert_eq!(fetcher.timeout, Duration::from_secs(7));
        assert_eq!(fetcher.user_agent, "roomsync-test");

        let scheduler = daemon.scheduler_config();
        assert_eq!(scheduler.default_interval_minutes, 12);
        assert_eq!(scheduler.concurrency, 2);
    }

    #[test]
    fn validate_reports_each_problem() {
        let mut config = ClientConfig::default();
        config.daemon.display_timezone = "Mars/Olympus".into();
        config.daemon.default_interval_minutes = 0;
        config.daemon.log_format = "xml".into();
        config.server.timeout = 0;

        let problems = config.validate();
        assert_eq!(problems.len(), 4);
        assert!(problems[0].starts_with("daemon.display_timezone"));
    }

    #[test]
    fn interval_has_an_upper_bound() {
        let mut config = ClientConfig::default();
        config.daemon.default_interval_minutes = u64::MAX;
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("daemon.default_interval_minutes"));

        config.daemon.default_interval_minutes = MAX_SYNC_INTERVAL_MINUTES;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nsocket_path = \"/run/roomsync.sock\"\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(
            config.server.socket_path,
            Some(PathBuf::from("/run/roomsync.sock"))
        );

        std::fs::write(&path, "[server\n").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
        assert!(ClientConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn dump_roundtrips_through_toml() {
        let config = ClientConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.daemon.display_timezone, config.daemon.display_timezone);
        assert_eq!(back.export, config.export);
    }
}
