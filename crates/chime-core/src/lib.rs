//! # Chime Core
//!
//! The core engine of the Chime chat-bot runtime.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Event Model**: the normalized [`Event`] every component exchanges
//! - **Errors**: [`TransportError`], [`StoreError`], [`DispatchError`], [`ScheduleError`]
//!
//! ### Framework Layer
//!
//! - **Handlers**: async callbacks over `Arc<Event>` ([`Handler`])
//! - **Dispatcher**: enum-keyed handler table with pattern, presence and
//!   reaction routing plus one-shot entries ([`Dispatcher`])
//! - **Scheduler**: interval and time-of-day triggers ([`Scheduler`])
//!
//! ### Integration Layer
//!
//! - **Connector**: the transport contract ([`Connector`])
//! - **Bot**: the back-reference handlers talk through ([`Bot`])
//! - **Store**: key-value persistence ([`Store`], [`NoopStore`], [`MemoryStore`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌───────────┐   Event   ┌─────────┐   Event   ┌────────────┐     ┌───────────┐
//! │ Connector │──────────▶│ Runtime │──────────▶│ Dispatcher │────▶│  Handler  │
//! └───────────┘           │  loop   │           └────────────┘     └───────────┘
//!                         │         │◀── trigger ── Scheduler
//!                         └─────────┘
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    BoxError, DispatchError, DispatchResult, Event, EventKind, HandlerFailure, HandlerResult,
    ScheduleError, ScheduleResult, StoreError, StoreResult, TransportError, TransportResult, User,
};

// Re-export framework types
pub use framework::{
    ARGS_GROUP, BoxedHandler, CancelResponse, Clock, DispatchMode, Dispatcher, ErrorHook, Handler,
    HandlerId, IntoHandlerResult, PendingResponse, REACTION_EXPIRY, Recurrence, Registration,
    ScheduleEntry, Scheduler, SystemClock, TICK, UserFilter, boxed, compute_first_fire,
};

// Re-export integration types
pub use integration::{
    Attachment, Bot, BoxedBot, BoxedConnector, BoxedStore, ChannelInfo, Connector, EventQueue,
    IdleSignal, MemoryStore, NoopStore, Store, StoreExt,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::framework::{
        BoxedHandler, DispatchMode, Dispatcher, Handler, PendingResponse, Recurrence, Scheduler,
        UserFilter, boxed,
    };
    pub use super::integration::{Attachment, Bot, BoxedBot, Connector, Store, StoreExt};
}
