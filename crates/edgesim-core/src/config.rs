//! Configuration system for the edge device simulator
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//!
//! Sensor ranges and anomaly thresholds are fixed and not part of the
//! configuration.

use crate::readings::StartupMetadata;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Loop and logging settings
    pub simulator: SimulatorSettings,

    /// Startup metadata
    pub metadata: StartupMetadata,

    /// IoT Hub connection settings
    pub hub: HubSettings,

    /// JSONL recording settings
    pub record: RecordSettings,
}

impl SimulatorConfig {
    /// Session configuration derived from this config
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            interval: self.simulator.interval(),
            max_iterations: 0,
            metadata: self.metadata.clone(),
        }
    }
}

/// Simulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Delay between loop iterations in milliseconds
    pub interval_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            interval_ms: 5000,
        }
    }
}

impl SimulatorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// IoT Hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Device connection string (HostName=...;DeviceId=...;SharedAccessKey=...)
    pub connection_string: Option<String>,

    /// MQTT keep-alive in seconds
    pub keep_alive_secs: u64,

    /// Time allowed for the initial connection in milliseconds
    pub connect_timeout_ms: u64,

    /// Lifetime of the generated SAS token in seconds
    pub sas_ttl_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            keep_alive_secs: 60,
            connect_timeout_ms: 10000,
            sas_ttl_secs: 86400,
        }
    }
}

/// JSONL recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    /// Output file path
    pub path: String,

    /// Append to existing file
    pub append: bool,

    /// Pretty print JSON
    pub pretty: bool,

    /// Flush after each message
    pub flush_each: bool,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            path: "edgesim-telemetry.jsonl".to_string(),
            append: true,
            pretty: false,
            flush_each: true,
        }
    }
}

/// Configuration loader
#[derive(Default)]
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. EDGESIM_CONFIG environment variable
    /// 3. ~/.config/edgesim/config.toml
    /// 4. /etc/edgesim/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<SimulatorConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                SimulatorConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Self::validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("EDGESIM_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("EDGESIM_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/edgesim/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<SimulatorConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: SimulatorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides, reading variables through `var`
    fn apply_env_overrides<F>(config: &mut SimulatorConfig, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("EDGESIM_LOG_LEVEL") {
            config.simulator.log_level = val;
        }
        if let Some(val) = var("EDGESIM_INTERVAL_MS") {
            match val.parse() {
                Ok(ms) => config.simulator.interval_ms = ms,
                Err(_) => warn!("Ignoring invalid EDGESIM_INTERVAL_MS: {}", val),
            }
        }
        if let Some(val) = var("EDGESIM_CONNECTION_STRING") {
            config.hub.connection_string = Some(val);
        }
        if let Some(val) = var("EDGESIM_RECORD_PATH") {
            config.record.path = val;
        }
    }

    /// Validate configuration
    fn validate(config: &SimulatorConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.simulator.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.simulator.log_level, valid_levels
            )));
        }

        if config.simulator.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Loop interval cannot be 0".to_string(),
            ));
        }

        if config.hub.sas_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "SAS token lifetime cannot be 0".to_string(),
            ));
        }

        if config.record.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Record path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("edgesim").join("config.toml"))
    }
}

/// The user's config directory
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.simulator.log_level, "info");
        assert_eq!(config.simulator.interval(), Duration::from_secs(5));
        assert_eq!(config.metadata.device, "edge-device");
        assert!(config.hub.connection_string.is_none());
        assert!(config.record.append);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [simulator]
            log_level = "debug"
        "#;
        let config: SimulatorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.simulator.log_level, "debug");
        assert_eq!(config.simulator.interval_ms, 5000);
        assert_eq!(config.metadata.location, "Factory-Floor-3");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [simulator]
            log_level = "trace"
            interval_ms = 250

            [metadata]
            device = "press-line-7"
            location = "Hall-B"
            type = "Hydraulic-Press"

            [hub]
            connection_string = "HostName=h.azure-devices.net;DeviceId=d;SharedAccessKey=a2V5"
            keep_alive_secs = 30

            [record]
            path = "/tmp/telemetry.jsonl"
            pretty = true
        "#;

        let config: SimulatorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.simulator.interval_ms, 250);
        assert_eq!(config.metadata.device, "press-line-7");
        assert_eq!(config.metadata.device_type, "Hydraulic-Press");
        assert_eq!(config.hub.keep_alive_secs, 30);
        assert_eq!(config.hub.connect_timeout_ms, 10000);
        assert!(config.hub.connection_string.is_some());
        assert_eq!(config.record.path, "/tmp/telemetry.jsonl");
        assert!(config.record.pretty);

        let session = config.session();
        assert_eq!(session.interval, Duration::from_millis(250));
        assert_eq!(session.metadata.location, "Hall-B");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[simulator]\ninterval_ms = 1000").unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.simulator.interval_ms, 1000);
    }

    #[test]
    fn test_load_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[simulator\ninterval_ms = ").unwrap();

        let result = ConfigLoader::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("EDGESIM_LOG_LEVEL", "warn"),
            ("EDGESIM_INTERVAL_MS", "750"),
            ("EDGESIM_CONNECTION_STRING", "HostName=x;DeviceId=y;SharedAccessKey=z"),
            ("EDGESIM_RECORD_PATH", "/tmp/out.jsonl"),
        ]
        .into_iter()
        .collect();

        let mut config = SimulatorConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.simulator.log_level, "warn");
        assert_eq!(config.simulator.interval_ms, 750);
        assert_eq!(
            config.hub.connection_string.as_deref(),
            Some("HostName=x;DeviceId=y;SharedAccessKey=z")
        );
        assert_eq!(config.record.path, "/tmp/out.jsonl");
    }

    #[test]
    fn test_env_override_ignores_bad_interval() {
        let mut config = SimulatorConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |key| {
            (key == "EDGESIM_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.simulator.interval_ms, 5000);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = SimulatorConfig {
            simulator: SimulatorSettings {
                log_level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let config = SimulatorConfig {
            simulator: SimulatorSettings {
                interval_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_serialize_config() {
        let config = SimulatorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[simulator]"));
        assert!(toml_str.contains("[metadata]"));
        assert!(toml_str.contains("type = \"Industrial-Edge-Node\""));
    }
}
