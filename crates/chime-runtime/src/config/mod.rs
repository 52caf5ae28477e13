//! Configuration module for the Chime runtime.
//!
//! This module provides figment-based configuration loading and validation
//! for the bot identity, reconnect policy, dispatch and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, ChimeConfig, ConnectionConfig, DispatchConfig, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
