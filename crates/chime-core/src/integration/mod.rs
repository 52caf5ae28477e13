//! Integration layer - interfaces to the outside world.
//!
//! This module contains the contracts the runtime is wired through:
//! - Transport connector (stream lifecycle, inbound queue, outbound operations)
//! - Bot back-reference used by handlers to talk back
//! - Persistence backend with no-op and in-memory implementations

pub mod bot;
pub mod connector;
pub mod store;

pub use bot::{Bot, BoxedBot};
pub use connector::{Attachment, BoxedConnector, ChannelInfo, Connector, EventQueue, IdleSignal};
pub use store::{BoxedStore, MemoryStore, NoopStore, Store, StoreExt};
