//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `vconnectord.toml` in the working directory, or the file named
//! by `VCONNECTOR_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use vconnector_app::connector::ConnectorConfig;
use vconnector_app::scheduler::SchedulerConfig;

const DEFAULT_PATH: &str = "vconnectord.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings.
    pub connector: ConnectorSection,
    /// Device definitions source.
    pub registry: RegistrySection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Engine tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectorSection {
    /// Nominal tick period.
    pub tick_interval_ms: u64,
    /// Upper bound of the random delay added to every tick period.
    pub tick_jitter_ms: u64,
    /// Time budget for starting property tasks within one tick.
    pub tick_deadline_ms: u64,
    /// Property tasks running at once within one tick.
    pub tick_parallelism: usize,
    /// Inbound commands handled concurrently.
    pub max_in_flight_commands: usize,
    /// Capacity of the outbound message channel.
    pub event_bus_capacity: usize,
    /// Fixed generator seed, for reproducible runs.
    pub seed: Option<u64>,
}

/// Registry file configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Path of the device definitions file.
    pub path: String,
    /// Seconds between reloads of the definitions file; `0` disables it.
    pub watch_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `vconnectord.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting values are out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("VCONNECTOR_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("VCONNECTOR_TICK_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.connector.tick_interval_ms = ms;
            }
        }
        if let Some(val) = var("VCONNECTOR_SEED") {
            if let Ok(seed) = val.parse() {
                self.connector.seed = Some(seed);
            }
        }
        if let Some(val) = var("VCONNECTOR_REGISTRY_PATH") {
            self.registry.path = val;
        }
        if let Some(val) = var("VCONNECTOR_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let connector = &self.connector;
        if connector.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_interval_ms must be non-zero".to_string(),
            ));
        }
        if connector.tick_deadline_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_deadline_ms must be non-zero".to_string(),
            ));
        }
        if connector.tick_parallelism == 0 || connector.max_in_flight_commands == 0 {
            return Err(ConfigError::Validation(
                "concurrency limits must be non-zero".to_string(),
            ));
        }
        if connector.event_bus_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_bus_capacity must be non-zero".to_string(),
            ));
        }
        if self.registry.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "registry path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine configuration derived from the `[connector]` section.
    #[must_use]
    pub fn connector_config(&self) -> ConnectorConfig {
        let connector = &self.connector;
        ConnectorConfig {
            scheduler: SchedulerConfig {
                interval: Duration::from_millis(connector.tick_interval_ms),
                jitter: Duration::from_millis(connector.tick_jitter_ms),
                deadline: Duration::from_millis(connector.tick_deadline_ms),
                parallelism: connector.tick_parallelism,
            },
            max_in_flight_commands: connector.max_in_flight_commands,
            seed: connector.seed,
        }
    }

    /// Reload period of the registry file, if watching is enabled.
    #[must_use]
    pub fn watch_interval(&self) -> Option<Duration> {
        (self.registry.watch_interval_secs > 0)
            .then(|| Duration::from_secs(self.registry.watch_interval_secs))
    }
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            tick_jitter_ms: 0,
            tick_deadline_ms: 1_000,
            tick_parallelism: 8,
            max_in_flight_commands: 32,
            event_bus_capacity: 256,
            seed: None,
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: "devices.toml".to_string(),
            watch_interval_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "vconnectord=info,vconnector_app=info,vconnector_adapter_registry_toml=info"
                .to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
