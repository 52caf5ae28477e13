//! Framework layer - event routing and time-based triggers.
//!
//! This module contains the processing pipeline:
//! - Handler trait for user callbacks
//! - User filter applied before dispatch
//! - Central dispatcher with pattern, presence and reaction routing
//! - Scheduler for interval and time-of-day triggers

pub mod dispatcher;
pub mod filter;
pub mod handler;
pub mod scheduler;

pub use dispatcher::{
    ARGS_GROUP, CancelResponse, DispatchMode, Dispatcher, ErrorHook, HandlerId, PendingResponse,
    REACTION_EXPIRY, Registration,
};
pub use filter::UserFilter;
pub use handler::{BoxedHandler, Handler, IntoHandlerResult, boxed};
pub use scheduler::{
    Clock, Recurrence, ScheduleEntry, Scheduler, SystemClock, TICK, compute_first_fire,
};
