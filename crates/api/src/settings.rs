//! Service Settings
//!
//! `config/monitor.toml` (or the file named by `METHANE_CONFIG`) overlaid by
//! `METHANE__<SECTION>__<KEY>` environment variables.

use alerting::MqttConfig;
use classification_engine::EngineConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default settings file
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid engine configuration: {0}")]
    Engine(#[from] classification_engine::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database url
    pub url: String,
    /// Records kept by the in-memory backend
    pub retention: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: "sqlite://methane.db".to_string(),
            retention: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchBackend {
    Log,
    Mqtt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend: DispatchBackend,
    pub mqtt: MqttConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: DispatchBackend::Log,
            mqtt: MqttConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `METHANE_CONFIG` or the default path, then the environment
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var("METHANE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (optional) overlaid by the environment
    pub fn load_from(path: &str) -> Result<Self, SettingsError> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("METHANE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(settings)
    }

    /// Parse settings from TOML text, without the environment
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;

        Self::from_config(settings)
    }

    fn from_config(settings: config::Config) -> Result<Self, SettingsError> {
        let app: AppConfig = settings.try_deserialize()?;
        app.engine.validate()?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reading_validator::MissingValuePolicy;
    use std::time::Duration;

    #[test]
    fn test_minimal_file() {
        let config = AppConfig::from_toml(
            r#"
            [engine]
            missing_value_policy = "drop"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.dispatch.backend, DispatchBackend::Log);
        assert_eq!(config.engine.missing_value_policy, MissingValuePolicy::Drop);
        assert_eq!(config.engine.baseline_max, 10.0);
    }

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9000

            [logging]
            level = "debug"
            format = "json"

            [storage]
            backend = "sqlite"
            url = "sqlite::memory:"

            [dispatch]
            backend = "mqtt"
            [dispatch.mqtt]
            host = "broker.local"
            topic_prefix = "site-7"

            [engine]
            baseline_max = 0.4
            emergency_ppm = 50.0
            dedupe_min_interval = 1000
            missing_value_policy = "interpolate"
            alert_cooldown = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.server.addr(), "0.0.0.0:9000");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.dispatch.mqtt.host, "broker.local");
        assert_eq!(config.dispatch.mqtt.port, 1883);
        assert_eq!(config.engine.dedupe_min_interval, Duration::from_secs(1));
        assert_eq!(config.engine.alert_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_policy_must_be_configured() {
        assert!(AppConfig::from_toml("[server]\nport = 9000\n").is_err());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let err = AppConfig::from_toml(
            r#"
            [engine]
            baseline_max = 50.0
            emergency_ppm = 10.0
            missing_value_policy = "drop"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Engine(_)));
    }
}
