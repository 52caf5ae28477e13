//! Event dispatcher for the Chime runtime.
//!
//! The [`Dispatcher`] owns the handler registry and routes every inbound
//! event to the handlers registered for its [`EventKind`].
//!
//! # Routing rules
//!
//! - **message**: a pending response registered for the same channel and user
//!   takes the message first, whatever its text. Otherwise command patterns are
//!   tried in registration order and the first match fires. Dispatch stops there.
//! - **presence change**: every handler registered for the event's user fires.
//! - **reaction added**: confirmations whose correlation id, reaction and user
//!   match fire once and are removed. Confirmations older than
//!   [`REACTION_EXPIRY`] are swept during the scan and never fire. Watch
//!   handlers fire on every matching reaction name.
//!
//! # Locking
//!
//! Entries live in an index-stable table keyed by [`HandlerId`] behind one
//! read/write lock. Matching scans under the read lock; one-shot entries are
//! claimed by removing them under the write lock, and only the caller that
//! removed an entry runs it. Callbacks always run after the lock is released,
//! so a handler may register or cancel entries without deadlocking.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new();
//! dispatcher.register(
//!     Registration::message(Regex::new(r"\Aping\z")?, boxed(ping))
//!         .description("ping - replies with pong"),
//! )?;
//! dispatcher.handle(event, DispatchMode::Spawn).await;
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Level, debug, span, trace, warn};

use crate::foundation::error::{DispatchError, DispatchResult, HandlerFailure};
use crate::foundation::event::{Event, EventKind};
use crate::framework::filter::UserFilter;
use crate::framework::handler::BoxedHandler;

/// How long a reaction confirmation stays armed.
pub const REACTION_EXPIRY: Duration = Duration::from_secs(3 * 60);

/// Name of the capture group holding command arguments.
pub const ARGS_GROUP: &str = "args";

/// Identifier of a registered entry. Ids grow monotonically, so ordering by id
/// is registration order.
pub type HandlerId = u64;

/// Callback invoked when a handler returns an error or panics.
pub type ErrorHook = Arc<dyn Fn(&Event, &HandlerFailure) + Send + Sync>;

/// Where a matched handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Await the handler before returning. Used with synchronous connectors.
    #[default]
    Inline,
    /// Run the handler on its own task, tracked for shutdown.
    Spawn,
}

// =============================================================================
// Registration
// =============================================================================

/// A persistent handler registration.
pub struct Registration {
    kind: EventKind,
    pattern: Option<Regex>,
    user: Option<String>,
    reaction: Option<String>,
    wants_tokens: bool,
    description: Option<String>,
    handler: BoxedHandler,
}

impl Registration {
    pub fn new(kind: EventKind, handler: BoxedHandler) -> Self {
        Self {
            kind,
            pattern: None,
            user: None,
            reaction: None,
            wants_tokens: false,
            description: None,
            handler,
        }
    }

    /// A message handler fired when `pattern` matches the message text.
    pub fn message(pattern: Regex, handler: BoxedHandler) -> Self {
        Self::new(EventKind::Message, handler).pattern(pattern)
    }

    /// A presence handler fired for `user`.
    pub fn presence(user: impl Into<String>, handler: BoxedHandler) -> Self {
        Self::new(EventKind::PresenceChange, handler).user(user)
    }

    /// A watch handler fired whenever anyone adds `reaction`.
    pub fn reaction(reaction: impl Into<String>, handler: BoxedHandler) -> Self {
        Self::new(EventKind::ReactionAdded, handler).reaction_name(reaction)
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn reaction_name(mut self, reaction: impl Into<String>) -> Self {
        self.reaction = Some(reaction.into());
        self
    }

    /// Split the captured arguments into `argv` before calling the handler.
    ///
    /// Arguments come from the `args` named group, or the first group if there is none.
    pub fn with_tokens(mut self, wants_tokens: bool) -> Self {
        self.wants_tokens = wants_tokens;
        self
    }

    /// Help line listed by [`Dispatcher::help`]. Entries without one stay hidden.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn into_slot(self) -> DispatchResult<Slot> {
        match self.kind {
            EventKind::Message => {
                let pattern = self.pattern.ok_or(DispatchError::MissingPattern)?;
                let args_group = self.wants_tokens.then(|| args_group(&pattern)).flatten();
                Ok(Slot::Command {
                    pattern,
                    args_group,
                    description: self.description,
                    handler: self.handler,
                })
            }
            EventKind::PresenceChange => Ok(Slot::Presence {
                user: self.user.ok_or(DispatchError::MissingUser)?,
                handler: self.handler,
            }),
            EventKind::ReactionAdded => Ok(Slot::Watch {
                reaction: self.reaction.ok_or(DispatchError::MissingReaction)?,
                handler: self.handler,
            }),
            kind @ (EventKind::Scheduled | EventKind::Unknown) => {
                Err(DispatchError::UnsupportedKind(kind))
            }
        }
    }
}

// =============================================================================
// Dispatch table
// =============================================================================

enum Slot {
    Command {
        pattern: Regex,
        /// Capture group split into `argv`, if the handler wants tokens.
        args_group: Option<usize>,
        description: Option<String>,
        handler: BoxedHandler,
    },
    Response {
        channel: String,
        user: String,
        reply: oneshot::Sender<String>,
    },
    Presence {
        user: String,
        handler: BoxedHandler,
    },
    Confirmation {
        correlation: String,
        reaction: String,
        user: Option<String>,
        handler: BoxedHandler,
        created_at: Instant,
    },
    Watch {
        reaction: String,
        handler: BoxedHandler,
    },
}

#[derive(Default)]
struct Table {
    next_id: HandlerId,
    slots: HashMap<EventKind, BTreeMap<HandlerId, Slot>>,
}

impl Table {
    fn insert(&mut self, kind: EventKind, slot: Slot) -> HandlerId {
        self.next_id += 1;
        let id = self.next_id;
        self.slots.entry(kind).or_default().insert(id, slot);
        id
    }

    fn remove(&mut self, kind: EventKind, id: HandlerId) -> Option<Slot> {
        self.slots.get_mut(&kind)?.remove(&id)
    }

    fn iter(&self, kind: EventKind) -> impl Iterator<Item = (HandlerId, &Slot)> {
        self.slots
            .get(&kind)
            .into_iter()
            .flat_map(|slots| slots.iter().map(|(id, slot)| (*id, slot)))
    }

    fn len(&self, kind: EventKind) -> usize {
        self.slots.get(&kind).map_or(0, BTreeMap::len)
    }
}

#[derive(Default)]
struct DispatcherInner {
    table: RwLock<Table>,
    filter: RwLock<UserFilter>,
    error_hook: RwLock<Option<ErrorHook>>,
    tracker: TaskTracker,
}

// =============================================================================
// Pending responses
// =============================================================================

/// Handle that withdraws a pending response registration.
#[derive(Debug)]
pub struct CancelResponse {
    id: HandlerId,
    inner: Weak<DispatcherInner>,
}

impl CancelResponse {
    /// Removes the registration. Returns false if it already fired or was removed.
    pub fn cancel(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = inner.table.write().remove(EventKind::Message, self.id);
        removed.is_some()
    }
}

/// The next message from a given user on a given channel, once it arrives.
#[derive(Debug)]
pub struct PendingResponse {
    cancel: CancelResponse,
    reply: oneshot::Receiver<String>,
}

impl PendingResponse {
    pub fn new(cancel: CancelResponse, reply: oneshot::Receiver<String>) -> Self {
        Self { cancel, reply }
    }

    /// Waits for the response text. Returns `None` if the registration was cancelled.
    pub async fn recv(self) -> Option<String> {
        self.reply.await.ok()
    }

    /// Waits up to `timeout`, withdrawing the registration if nothing arrives.
    pub async fn recv_timeout(self, timeout: Duration) -> Option<String> {
        let Self { cancel, reply } = self;
        match tokio::time::timeout(timeout, reply).await {
            Ok(text) => text.ok(),
            Err(_) => {
                cancel.cancel();
                None
            }
        }
    }

    /// Withdraws the registration without waiting.
    pub fn cancel(self) -> bool {
        self.cancel.cancel()
    }

    pub fn into_parts(self) -> (CancelResponse, oneshot::Receiver<String>) {
        (self.cancel, self.reply)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Handler registry and event router. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: UserFilter) -> Self {
        let dispatcher = Self::new();
        dispatcher.set_filter(filter);
        dispatcher
    }

    /// Replaces the user gate applied before dispatch.
    pub fn set_filter(&self, filter: UserFilter) {
        *self.inner.filter.write() = filter;
    }

    /// Installs the hook called whenever a handler fails.
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&Event, &HandlerFailure) + Send + Sync + 'static,
    {
        *self.inner.error_hook.write() = Some(Arc::new(hook));
    }

    /// Adds a persistent handler.
    pub fn register(&self, registration: Registration) -> DispatchResult<HandlerId> {
        let kind = registration.kind;
        let slot = registration.into_slot()?;
        let id = self.inner.table.write().insert(kind, slot);
        trace!(kind = %kind, id, "handler registered");
        Ok(id)
    }

    /// Captures the next message `user` sends on `channel`.
    ///
    /// The receiver yields the message text. Dropping it leaves a stale entry
    /// that the next message scan sweeps away.
    pub fn register_ephemeral_response(
        &self,
        channel: impl Into<String>,
        user: impl Into<String>,
    ) -> (CancelResponse, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let slot = Slot::Response {
            channel: channel.into(),
            user: user.into(),
            reply: tx,
        };
        let id = self.inner.table.write().insert(EventKind::Message, slot);
        let cancel = CancelResponse {
            id,
            inner: Arc::downgrade(&self.inner),
        };
        (cancel, rx)
    }

    /// Same as [`Self::register_ephemeral_response`], bundled as a [`PendingResponse`].
    pub fn require_response(
        &self,
        channel: impl Into<String>,
        user: impl Into<String>,
    ) -> PendingResponse {
        let (cancel, rx) = self.register_ephemeral_response(channel, user);
        PendingResponse::new(cancel, rx)
    }

    /// Runs `handler` once when `user` (anyone, if `None`) adds `reaction`
    /// to the message identified by `correlation`.
    pub fn register_ephemeral_reaction(
        &self,
        correlation: impl Into<String>,
        reaction: impl Into<String>,
        user: Option<String>,
        handler: BoxedHandler,
    ) -> HandlerId {
        let slot = Slot::Confirmation {
            correlation: correlation.into(),
            reaction: reaction.into(),
            user,
            handler,
            created_at: Instant::now(),
        };
        self.inner.table.write().insert(EventKind::ReactionAdded, slot)
    }

    /// Removes an entry. Returns false if it is already gone.
    pub fn remove(&self, kind: EventKind, id: HandlerId) -> bool {
        self.inner.table.write().remove(kind, id).is_some()
    }

    /// Number of live entries for `kind`, including one-shot ones.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.table.read().len(kind)
    }

    /// Help lines of described commands, in registration order.
    pub fn help(&self) -> Vec<String> {
        self.inner
            .table
            .read()
            .iter(EventKind::Message)
            .filter_map(|(_, slot)| match slot {
                Slot::Command {
                    description: Some(description),
                    ..
                } => Some(description.clone()),
                _ => None,
            })
            .collect()
    }

    /// Routes `event` to its handlers. Returns whether any handler was selected.
    pub async fn handle(&self, event: Event, mode: DispatchMode) -> bool {
        if !self.inner.filter.read().allows(&event.user().id) {
            trace!(user = %event.user().id, "user filtered, dropping event");
            return false;
        }

        let span = span!(Level::DEBUG, "dispatch", kind = %event.kind(), channel = %event.channel());
        async move {
            match event.kind() {
                EventKind::Message => self.handle_message(event, mode).await,
                EventKind::PresenceChange => self.handle_presence(event, mode).await,
                EventKind::ReactionAdded => self.handle_reaction(event, mode).await,
                EventKind::Scheduled | EventKind::Unknown => {
                    trace!("no handlers for this kind");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs one handler under the dispatcher's error policy.
    ///
    /// Errors and panics are logged and passed to the error hook; they never
    /// propagate to the caller.
    pub async fn invoke(&self, event: Arc<Event>, handler: BoxedHandler, mode: DispatchMode) {
        let hook = self.inner.error_hook.read().clone();
        let run = guarded(event, handler, hook);
        match mode {
            DispatchMode::Inline => run.await,
            DispatchMode::Spawn => {
                self.inner.tracker.spawn(run.in_current_span());
            }
        }
    }

    /// Number of spawned handlers still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Stops accepting spawned work and waits up to `grace` for running handlers.
    ///
    /// Returns true if every handler finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.tracker.close();
        tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok()
    }

    // ─── per-kind routing ───

    async fn handle_message(&self, mut event: Event, mode: DispatchMode) -> bool {
        if self.deliver_pending_response(&event) {
            return true;
        }

        let matched = {
            let table = self.inner.table.read();
            table
                .iter(EventKind::Message)
                .find_map(|(id, slot)| match slot {
                    Slot::Command {
                        pattern,
                        args_group,
                        handler,
                        ..
                    } => pattern.captures(event.text()).map(|caps| {
                        let argv = args_group.map(|group| tokens(&caps, group)).unwrap_or_default();
                        (id, Arc::clone(handler), argv)
                    }),
                    _ => None,
                })
        };

        let Some((id, handler, argv)) = matched else {
            trace!("no command matched");
            return false;
        };

        debug!(handler = id, argc = argv.len(), "command matched");
        event.set_argv(argv);
        self.invoke(Arc::new(event), handler, mode).await;
        true
    }

    fn deliver_pending_response(&self, event: &Event) -> bool {
        let (candidate, stale) = {
            let table = self.inner.table.read();
            let mut candidate = None;
            let mut stale = Vec::new();
            for (id, slot) in table.iter(EventKind::Message) {
                let Slot::Response {
                    channel,
                    user,
                    reply,
                } = slot
                else {
                    continue;
                };
                if reply.is_closed() {
                    stale.push(id);
                } else if candidate.is_none()
                    && channel == event.channel()
                    && *user == event.user().id
                {
                    candidate = Some(id);
                }
            }
            (candidate, stale)
        };

        if candidate.is_none() && stale.is_empty() {
            return false;
        }

        let claimed = {
            let mut table = self.inner.table.write();
            for id in &stale {
                table.remove(EventKind::Message, *id);
            }
            candidate.and_then(|id| table.remove(EventKind::Message, id))
        };
        if !stale.is_empty() {
            trace!(swept = stale.len(), "removed abandoned pending responses");
        }

        match claimed {
            Some(Slot::Response { reply, .. }) => {
                let delivered = reply.send(event.text().to_owned()).is_ok();
                if delivered {
                    debug!(user = %event.user().id, "message delivered to pending response");
                }
                delivered
            }
            _ => false,
        }
    }

    async fn handle_presence(&self, event: Event, mode: DispatchMode) -> bool {
        let handlers: Vec<BoxedHandler> = {
            let table = self.inner.table.read();
            table
                .iter(EventKind::PresenceChange)
                .filter_map(|(_, slot)| match slot {
                    Slot::Presence { user, handler } if *user == event.user().id => {
                        Some(Arc::clone(handler))
                    }
                    _ => None,
                })
                .collect()
        };

        self.fire_all(event, handlers, mode).await
    }

    async fn handle_reaction(&self, event: Event, mode: DispatchMode) -> bool {
        let Some(reaction) = event.reaction() else {
            trace!("reaction event without a reaction name");
            return false;
        };
        let correlation = event.id();
        let now = Instant::now();

        let (expired, confirmed, mut handlers) = {
            let table = self.inner.table.read();
            let mut expired = Vec::new();
            let mut confirmed = Vec::new();
            let mut watchers = Vec::new();
            for (id, slot) in table.iter(EventKind::ReactionAdded) {
                match slot {
                    Slot::Confirmation {
                        correlation: expected,
                        reaction: wanted,
                        user,
                        created_at,
                        ..
                    } => {
                        if now.duration_since(*created_at) >= REACTION_EXPIRY {
                            expired.push(id);
                        } else if *expected == correlation
                            && wanted == reaction
                            && user.as_ref().is_none_or(|u| *u == event.user().id)
                        {
                            confirmed.push(id);
                        }
                    }
                    Slot::Watch {
                        reaction: wanted,
                        handler,
                    } if wanted == reaction => watchers.push(Arc::clone(handler)),
                    _ => {}
                }
            }
            (expired, confirmed, watchers)
        };

        if !expired.is_empty() || !confirmed.is_empty() {
            let mut table = self.inner.table.write();
            for id in &expired {
                table.remove(EventKind::ReactionAdded, *id);
            }
            let mut claimed = Vec::with_capacity(confirmed.len());
            for id in confirmed {
                if let Some(Slot::Confirmation { handler, .. }) =
                    table.remove(EventKind::ReactionAdded, id)
                {
                    claimed.push(handler);
                }
            }
            claimed.append(&mut handlers);
            handlers = claimed;
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "swept expired reaction confirmations");
        }

        self.fire_all(event, handlers, mode).await
    }

    async fn fire_all(&self, event: Event, handlers: Vec<BoxedHandler>, mode: DispatchMode) -> bool {
        if handlers.is_empty() {
            trace!("no handlers matched");
            return false;
        }
        debug!(count = handlers.len(), "firing handlers");
        let event = Arc::new(event);
        for handler in handlers {
            self.invoke(Arc::clone(&event), handler, mode).await;
        }
        true
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.read();
        f.debug_struct("Dispatcher")
            .field("message", &table.len(EventKind::Message))
            .field("presence_change", &table.len(EventKind::PresenceChange))
            .field("reaction_added", &table.len(EventKind::ReactionAdded))
            .field("in_flight", &self.inner.tracker.len())
            .finish()
    }
}

/// The `args` group if the pattern names one, otherwise the first group.
fn args_group(pattern: &Regex) -> Option<usize> {
    pattern
        .capture_names()
        .position(|name| name == Some(ARGS_GROUP))
        .or_else(|| (pattern.captures_len() > 1).then_some(1))
}

fn tokens(caps: &Captures<'_>, group: usize) -> Vec<String> {
    caps.get(group)
        .map(|m| m.as_str().split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

async fn guarded(event: Arc<Event>, handler: BoxedHandler, hook: Option<ErrorHook>) {
    let call = AssertUnwindSafe(async { handler.call(Arc::clone(&event)).await });
    let failure = match call.catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => HandlerFailure::Error(err),
        Err(payload) => HandlerFailure::Panicked(panic_message(payload.as_ref())),
    };

    warn!(
        kind = %event.kind(),
        channel = %event.channel(),
        user = %event.user().id,
        error = %failure,
        "handler failed"
    );
    if let Some(hook) = hook {
        hook(event.as_ref(), &failure);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
