//! Chime Runtime - connection lifecycle and orchestration for Chime bots.
//!
//! This crate provides:
//! - The orchestrator (`ChimeRuntime`) with its reconnect and receive loops
//! - The bot back-reference handed to every event (`RuntimeBot`)
//! - Layered configuration (`ConfigLoader`)
//! - Logging configuration
//!
//! ```ignore
//! use chime_runtime::ChimeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ChimeRuntime::builder()
//!         .connector(MyConnector::new())
//!         .handlers(|registry| {
//!             registry.on_command("ping", "replies with pong", ping)?;
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Connection Lifecycle
//!
//! - Failed connects back off linearly: the n-th failure in a row waits
//!   `n * connection.base_backoff_secs`
//! - More than `connection.max_retries` failures in a row end the run
//! - A dropped stream reconnects immediately; the retry count starts over
//!   after every successful connect

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod testing;

// Re-exports
pub use bot::RuntimeBot;
pub use config::{ChimeConfig, ConfigError, ConfigLoader, ConfigResult, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{ChimeRuntime, RuntimeBuilder};
pub use state::{ConnectionState, RuntimeStats, StatsSnapshot};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
