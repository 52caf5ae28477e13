//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, ChimeConfig, ConnectionConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ChimeConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_connection_config(&config.connection)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.name.is_empty() {
        return Err(ConfigError::Missing { key: "bot.name" });
    }

    // Commands are matched as "<name> <pattern>", so the name must be one word.
    if bot.name.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "bot.name",
            format!("must be a single word, got {:?}", bot.name),
        ));
    }

    Ok(())
}

fn validate_connection_config(connection: &ConnectionConfig) -> ConfigResult<()> {
    if connection.base_backoff_secs == 0 {
        return Err(ConfigError::invalid("connection.base_backoff_secs", "must be positive"));
    }

    if connection.max_retries == 0 {
        return Err(ConfigError::invalid("connection.max_retries", "must be positive"));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::Missing { key: "logging.file_path" });
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::invalid("logging.filters", "has a blank module name"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ChimeConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_bot_name() {
        let mut config = ChimeConfig::default();
        config.bot.name = String::new();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing { key: "bot.name" })
        ));

        config.bot.name = "my bot".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid { key: "bot.name", .. })
        ));
    }

    #[test]
    fn test_validate_connection() {
        let mut config = ChimeConfig::default();
        config.connection.base_backoff_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ChimeConfig::default();
        config.connection.max_retries = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_logging() {
        let mut config = ChimeConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing { key: "logging.file_path" })
        ));

        config.logging.file_path = Some("chime.log".into());
        assert!(validate_config(&config).is_ok());

        config.logging.filters.insert(" ".to_string(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }
}
