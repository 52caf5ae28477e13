//! Transport connector contract.
//!
//! A connector owns the wire protocol: it establishes the stream, keeps it
//! alive, normalizes inbound payloads into [`Event`]s and performs outbound
//! operations. The runtime drives it through this trait only.
//!
//! # Stream lifecycle
//!
//! 1. The runtime calls [`Connector::connect`].
//! 2. On success it runs [`Connector::listen`] on its own task. `listen`
//!    pushes normalized events into [`Connector::received_events`] and only
//!    returns when the stream is gone; its return value is the single
//!    terminal error for that stream.
//! 3. The runtime reconnects after `listen` returns.
//!
//! # Synchronous connectors
//!
//! A connector whose [`Connector::is_async`] returns false must wait on
//! [`Connector::idle`] after pushing an event and before reading the next one.
//! The runtime acknowledges once the event is fully handled.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::foundation::error::TransportResult;
use crate::foundation::event::Event;

/// Channel metadata resolved by the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// A file to upload to a channel.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub title: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(title: impl Into<String>, file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            title: title.into(),
            file_name: file_name.into(),
            content,
        }
    }
}

/// Queue of normalized inbound events.
///
/// The connector pushes, the runtime receives. FIFO.
#[derive(Debug)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<mpsc::UnboundedReceiver<Event>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueues an event. Returns false if the queue has been closed.
    pub fn push(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Waits for the next event. Cancel-safe.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Sender half, for connectors that push from spawned tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }
}

/// Idle acknowledgment used by synchronous connectors.
///
/// An [`IdleSignal::ack`] issued before anyone waits is kept, so the next
/// [`IdleSignal::wait`] returns immediately.
#[derive(Debug, Default)]
pub struct IdleSignal {
    notify: Notify,
}

impl IdleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that the last event has been handled.
    pub fn ack(&self) {
        self.notify.notify_one();
    }

    /// Waits for the runtime to finish the last event.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// A messaging backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a stream.
    async fn connect(&self) -> TransportResult<()>;

    /// Reads the stream until it fails. The returned error is the stream's
    /// terminal error; `Ok(())` means the stream ended without one.
    async fn listen(&self) -> TransportResult<()>;

    /// Normalized inbound events.
    fn received_events(&self) -> &EventQueue;

    /// Idle acknowledgment point, used only when [`Self::is_async`] is false.
    fn idle(&self) -> &IdleSignal;

    /// Whether handlers may run concurrently with reading the next event.
    fn is_async(&self) -> bool;

    /// Posts `text` to the event's channel as `username`.
    async fn send(&self, event: &Event, username: &str, text: &str) -> TransportResult<()>;

    /// Posts `text` and returns the wire timestamp of the posted message.
    async fn send_with_confirmation(
        &self,
        event: &Event,
        username: &str,
        text: &str,
    ) -> TransportResult<String>;

    /// Sends `text` privately to `user_id`.
    async fn send_private(&self, event: &Event, user_id: &str, text: &str) -> TransportResult<()>;

    /// Uploads a file to the event's channel.
    async fn attach(&self, event: &Event, attachment: Attachment) -> TransportResult<()>;

    /// Shows the typing indicator on `channel` until the returned token is
    /// cancelled. The returned token must be a child of `scope`.
    fn with_typing_indicator(&self, channel: &str, scope: &CancellationToken) -> CancellationToken;

    async fn channel_info(&self, channel: &str) -> TransportResult<ChannelInfo>;

    /// Link to the message behind `event`.
    async fn permalink(&self, event: &Event) -> TransportResult<String>;
}

/// Shared connector handle.
pub type BoxedConnector = Arc<dyn Connector>;
