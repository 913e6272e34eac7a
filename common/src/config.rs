use config::{Config, ConfigError, Map};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable carrying the out-of-band system identifier.
pub const SYSTEM_ID_ENV: &str = "SYSTEM_ID";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_base_interval")]
    pub base_interval_secs: u64,
    /// Stop after this many cycles even if replay data remains.
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReplayConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub system_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval(),
            max_iterations: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_base_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    /// Loads settings from an optional file, `COLLECTOR_*` variables and
    /// finally `SYSTEM_ID`, later sources winning.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::with_environment(path, std::env::vars().collect())
    }

    /// Same layering as [`Settings::new`], reading variables from `vars`
    /// instead of the process environment.
    pub fn with_environment(path: &str, vars: Map<String, String>) -> Result<Self, ConfigError> {
        let system_id = vars.get(SYSTEM_ID_ENV).cloned();

        let builder = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .set_override_option("replay.system_id", system_id)?;

        // Build the configuration
        let config = builder.build()?;

        let settings: Settings = config.try_deserialize()?;

        debug!(
            base_interval_secs = settings.collector.base_interval_secs,
            replay_directory = ?settings.replay.directory,
            system_id = ?settings.replay.system_id,
            "Loaded collector settings"
        );

        Ok(settings)
    }
}
