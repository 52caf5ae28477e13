//! Unified error types for the Chime core.
//!
//! Each concern gets its own enum: transports, persistence, dispatch-table
//! registration and scheduling. Handler failures are not errors of the
//! runtime itself; they are captured as [`HandlerFailure`] and reported
//! through the dispatcher's error hook.

use std::time::Duration;

use thiserror::Error;

use super::event::EventKind;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by user callbacks. `Ok(())` marks the call as successful.
pub type HandlerResult = Result<(), BoxError>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a connector or by outbound operations on a bot.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connector could not establish a stream.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for failure.
        reason: String,
    },

    /// An established stream ended.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// An outbound message could not be delivered.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The connector has no active stream.
    #[error("not connected")]
    NotConnected,

    /// The event has no bot attached, so it cannot talk back.
    #[error("event is not attached to a bot")]
    Detached,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a connection failure with the given reason.
    #[must_use]
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Creates a connection-closed error with the given reason.
    #[must_use]
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Store Errors
// =============================================================================

/// Errors raised by a persistence backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The table has never been written to.
    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    /// The table exists but holds no such key.
    #[error("key '{key}' not found in table '{table}'")]
    KeyNotFound { table: String, key: String },

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[must_use]
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    #[must_use]
    pub fn key_not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KeyNotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Returns true for either "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound { .. } | Self::KeyNotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors raised when a registration does not fit its event kind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Handlers cannot be registered for this kind.
    #[error("handlers cannot be registered for '{0}' events")]
    UnsupportedKind(EventKind),

    /// Message handlers need a pattern.
    #[error("message handlers require a pattern")]
    MissingPattern,

    /// Presence handlers need a user id.
    #[error("presence handlers require a user id")]
    MissingUser,

    /// Reaction handlers need a reaction name.
    #[error("reaction handlers require a reaction name")]
    MissingReaction,
}

/// Result type for dispatcher registration.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Schedule Errors
// =============================================================================

/// Errors raised when registering a schedule entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Interval entries cannot be finer than the scheduler tick.
    #[error("interval {interval:?} is less than the 1 minute scheduler resolution")]
    IntervalTooSmall { interval: Duration },

    /// Hour or minute out of range.
    #[error("invalid time of day {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },

    /// The wall-clock time does not exist in the local time zone.
    #[error("local time {hour:02}:{minute:02} does not exist on {date}")]
    NonexistentLocalTime {
        date: String,
        hour: u32,
        minute: u32,
    },
}

/// Result type for scheduler registration.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

// =============================================================================
// Handler Failures
// =============================================================================

/// How a user callback failed. Passed to the dispatcher's error hook.
#[derive(Debug)]
pub enum HandlerFailure {
    /// The callback returned an error.
    Error(BoxError),
    /// The callback panicked.
    Panicked(String),
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "handler returned an error: {err}"),
            Self::Panicked(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}
