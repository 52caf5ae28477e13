//! Runtime error types.

use chime_core::{StoreError, TransportError};
use chime_framework::RegistryError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that end or prevent a bot run.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The connector failed more times in a row than the retry ceiling allows.
    #[error("gave up connecting after {attempts} attempts: {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A handler registration was rejected while building the runtime.
    #[error("Registration error: {0}")]
    Registry(#[from] RegistryError),

    /// The store failed to close.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The builder was not given a connector.
    #[error("No connector configured")]
    MissingConnector,

    /// `run` was called on a runtime that is running or has already run.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
