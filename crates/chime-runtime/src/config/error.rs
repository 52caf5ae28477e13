//! Errors raised while assembling a [`ChimeConfig`](super::ChimeConfig).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The file extension has no enabled figment provider.
    #[error("cannot read `.{0}` config files")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Extract(#[from] Box<figment::Error>),

    #[error("`{key}` must be set")]
    Missing { key: &'static str },

    #[error("`{key}` {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
