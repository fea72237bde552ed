use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::session::InMemorySessionConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub limits: LimitsConfig,
    pub ui: UiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub time_to_idle_secs: u64,
    pub max_sessions: u64,
}

/// Upload size limits in bytes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_model_bytes: usize,
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            time_to_idle_secs: 3600,
            max_sessions: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn store_config(&self) -> InMemorySessionConfig {
        InMemorySessionConfig::default()
            .with_max_capacity(self.max_sessions)
            .with_time_to_idle(Duration::from_secs(self.time_to_idle_secs))
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_model_bytes: 256 * 1024 * 1024,
            max_image_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            static_dir: PathBuf::from("public"),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
