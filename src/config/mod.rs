//! Process configuration

mod app_config;

pub use app_config::{
    AppConfig, LimitsConfig, LogFormat, LoggingConfig, ServerConfig, SessionConfig, UiConfig,
};
