//! Test doubles shared by the runtime's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chime_core::{
    Attachment, ChannelInfo, Connector, Event, EventQueue, IdleSignal, NoopStore, Store,
    StoreResult, TransportError, TransportResult, User,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Connector driven entirely by the test.
///
/// Fails the first `failures` connects, then streams whatever the test
/// pushes until [`ScriptedConnector::drop_stream`] is notified. Outbound
/// messages are forwarded to the receiver returned by [`ScriptedConnector::new`]
/// as `"username: text"`.
pub(crate) struct ScriptedConnector {
    failures: AtomicU32,
    pub(crate) attempts: Mutex<Vec<Instant>>,
    /// Number of successful connects.
    pub(crate) connects: watch::Sender<u32>,
    pub(crate) drop_stream: Notify,
    pub(crate) fail_sends: AtomicBool,
    events: EventQueue,
    pub(crate) idle: IdleSignal,
    is_async: bool,
    outbox: mpsc::UnboundedSender<String>,
}

impl ScriptedConnector {
    pub(crate) fn new(
        failures: u32,
        is_async: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbox, sent) = mpsc::unbounded_channel();
        let connector = Self {
            failures: AtomicU32::new(failures),
            attempts: Mutex::new(Vec::new()),
            connects: watch::channel(0).0,
            drop_stream: Notify::new(),
            fail_sends: AtomicBool::new(false),
            events: EventQueue::new(),
            idle: IdleSignal::new(),
            is_async,
            outbox,
        };
        (Arc::new(connector), sent)
    }

    /// Queues a message from `user` on channel `C1`.
    pub(crate) fn push(&self, user: &str, text: &str) {
        self.events
            .push(Event::message("C1", User::new(user, user), text));
    }

    fn deliver(&self, line: String) -> TransportResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("scripted send failure".into()));
        }
        let _ = self.outbox.send(line);
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> TransportResult<()> {
        self.attempts.lock().push(Instant::now());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::connection_failed("scripted failure"));
        }
        self.connects.send_modify(|n| *n += 1);
        Ok(())
    }

    async fn listen(&self) -> TransportResult<()> {
        self.drop_stream.notified().await;
        Err(TransportError::connection_closed("scripted drop"))
    }

    fn received_events(&self) -> &EventQueue {
        &self.events
    }

    fn idle(&self) -> &IdleSignal {
        &self.idle
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    async fn send(&self, _event: &Event, username: &str, text: &str) -> TransportResult<()> {
        self.deliver(format!("{username}: {text}"))
    }

    async fn send_with_confirmation(
        &self,
        _event: &Event,
        username: &str,
        text: &str,
    ) -> TransportResult<String> {
        self.deliver(format!("{username}: {text}"))?;
        Ok("1700000000.000100".to_string())
    }

    async fn send_private(&self, _event: &Event, user_id: &str, text: &str) -> TransportResult<()> {
        self.deliver(format!("@{user_id}: {text}"))
    }

    async fn attach(&self, _event: &Event, attachment: Attachment) -> TransportResult<()> {
        self.deliver(format!("file: {}", attachment.file_name))
    }

    fn with_typing_indicator(&self, _channel: &str, scope: &CancellationToken) -> CancellationToken {
        scope.child_token()
    }

    async fn channel_info(&self, channel: &str) -> TransportResult<ChannelInfo> {
        Ok(ChannelInfo {
            id: channel.to_string(),
            name: channel.to_lowercase(),
        })
    }

    async fn permalink(&self, event: &Event) -> TransportResult<String> {
        Ok(format!("scripted://{}", event.id()))
    }
}

/// Store that counts `close` calls and keeps nothing.
#[derive(Default)]
pub(crate) struct CountingStore {
    pub(crate) closes: AtomicUsize,
}

#[async_trait]
impl Store for CountingStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Vec<u8>> {
        NoopStore.get(table, key).await
    }

    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        NoopStore.set(table, key, value).await
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<()> {
        NoopStore.delete(table, key).await
    }

    async fn list(&self, table: &str) -> StoreResult<Vec<String>> {
        NoopStore.list(table).await
    }

    async fn list_prefix(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>> {
        NoopStore.list_prefix(table, prefix).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
