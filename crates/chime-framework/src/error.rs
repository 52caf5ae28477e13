//! Error types for the Chime framework.

use chime_core::{DispatchError, ScheduleError};
use thiserror::Error;

/// Errors raised while registering handlers. These abort the registering call.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The command or hear pattern does not compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The schedule is not acceptable to the scheduler.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The registration does not fit its event kind.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl RegistryError {
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }
}

/// Result type for registration operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
