//! Foundation layer - the event model and error types.
//!
//! This module contains the building blocks every other layer depends on:
//! - The normalized [`Event`] passed between connector, dispatcher and handlers
//! - Error types for transports, persistence, registration and scheduling

pub mod error;
pub mod event;

pub use error::{
    BoxError, DispatchError, DispatchResult, HandlerFailure, HandlerResult, ScheduleError,
    ScheduleResult, StoreError, StoreResult, TransportError, TransportResult,
};
pub use event::{Event, EventKind, User};
