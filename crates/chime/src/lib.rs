//! # Chime
//!
//! A chat-bot runtime: pattern-routed handlers, interval and time-of-day
//! schedules, and a connection loop that reconnects on its own.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  events   ┌──────────────┐  first match   ┌──────────┐
//! │ Connector │──────────▶│ ChimeRuntime │───────────────▶│ Handlers │──▶ event.reply(..)
//! └───────────┘           │  (select)    │                └──────────┘
//!       ▲                 └──────────────┘                     │
//!       │                        ▲ triggers                    │
//!       │                  ┌───────────┐                       │
//!       │                  │ Scheduler │                       │
//!       │                  └───────────┘                       │
//!       └──────────────────────── RuntimeBot ◀─────────────────┘
//! ```
//!
//! - **Connector**: one messaging backend (stream in, messages out)
//! - **Dispatcher**: routes messages, presence and reactions to handlers
//! - **Scheduler**: fires callbacks every N minutes or at a time of day
//! - **Registry**: the surface bot authors register commands on
//! - **Runtime**: connects, reconnects, selects and shuts down
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chime::prelude::*;
//!
//! async fn ping(event: Arc<Event>) -> HandlerResult {
//!     event.reply("pong").await?;
//!     Ok(())
//! }
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
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `chime.toml` (default)
//! - `yaml-config`: read `chime.yaml`
//! - `json-log`: newline-delimited JSON log output

pub use chime_core as core;
pub use chime_framework as framework;
pub use chime_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use chime::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use chime_runtime::{ChimeConfig, ChimeRuntime, RuntimeBuilder, RuntimeError};

    // Registration
    pub use chime_framework::{HandlerRegistry, RegistryError, RegistryResult};

    // Events and handlers
    pub use chime_core::{
        Attachment, DispatchMode, Event, EventKind, HandlerResult, PendingResponse, Recurrence,
        User,
    };

    // Traits for custom backends
    pub use chime_core::{
        Bot, BoxedBot, ChannelInfo, Connector, EventQueue, IdleSignal, MemoryStore, NoopStore,
        Store, StoreExt, TransportError, TransportResult,
    };
}
