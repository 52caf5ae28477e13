//! # Chime Framework
//!
//! The registration surface bot authors program against.
//!
//! This layer provides:
//! - [`HandlerRegistry`] for commands, hear patterns, presence and reaction
//!   listeners and schedules
//! - Help text built from command descriptions
//!
//! Registrations are validated when they are made, so a bad pattern or a
//! sub-minute interval fails at startup instead of at dispatch time.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::HandlerRegistry;
