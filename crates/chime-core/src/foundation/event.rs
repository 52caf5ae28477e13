//! The normalized event model.
//!
//! Every inbound wire event is turned into an [`Event`] by the connector
//! before it reaches the runtime, and the scheduler synthesizes events of
//! kind [`EventKind::Scheduled`]. Handlers receive events as `Arc<Event>`.
//!
//! An event is immutable once it is handed to a handler. The only field the
//! dispatcher fills in is `argv`, the whitespace-split arguments captured by a
//! command pattern.
//!
//! Events carry an optional back-reference to the bot that received them,
//! which powers the convenience methods ([`Event::say`], [`Event::reply`],
//! [`Event::say_require_response`], ...).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::error::{TransportError, TransportResult};
use crate::framework::dispatcher::PendingResponse;
use crate::framework::handler::Handler;
use crate::integration::bot::BoxedBot;
use crate::integration::connector::Attachment;

/// The kind of an event; also the key of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chat message.
    Message,
    /// A user became active (typing, coming online).
    PresenceChange,
    /// A reaction was added to a message.
    ReactionAdded,
    /// A schedule entry fired.
    Scheduled,
    /// Anything the connector could not classify.
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::PresenceChange => "presence_change",
            Self::ReactionAdded => "reaction_added",
            Self::Scheduled => "scheduled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat user as seen by the connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend user id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Renders the in-chat mention for this user, e.g. `<@U123>`.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A normalized event.
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    text: String,
    argv: Vec<String>,
    channel: String,
    user: User,
    reaction: Option<String>,
    ts: String,
    received_at: DateTime<Local>,
    bot: Option<BoxedBot>,
}

impl Event {
    /// Creates an empty event of the given kind on `channel`.
    pub fn new(kind: EventKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            text: String::new(),
            argv: Vec::new(),
            channel: channel.into(),
            user: User::default(),
            reaction: None,
            ts: String::new(),
            received_at: Local::now(),
            bot: None,
        }
    }

    /// A chat message from `user` on `channel`.
    pub fn message(channel: impl Into<String>, user: User, text: impl Into<String>) -> Self {
        Self::new(EventKind::Message, channel)
            .with_user(user)
            .with_text(text)
    }

    /// A presence change for `user`.
    pub fn presence(user: User) -> Self {
        Self::new(EventKind::PresenceChange, "").with_user(user)
    }

    /// `user` reacted with `reaction` to the message posted at `ts` on `channel`.
    ///
    /// The resulting [`Event::id`] is the correlation id of the reacted-to message.
    pub fn reaction_added(
        channel: impl Into<String>,
        ts: impl Into<String>,
        user: User,
        reaction: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::ReactionAdded, channel)
            .with_ts(ts)
            .with_user(user)
            .with_reaction(reaction)
    }

    /// A synthetic event emitted by the scheduler for `channel`.
    pub fn scheduled(channel: impl Into<String>) -> Self {
        Self::new(EventKind::Scheduled, channel)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = user;
        self
    }

    pub fn with_reaction(mut self, reaction: impl Into<String>) -> Self {
        self.reaction = Some(reaction.into());
        self
    }

    /// Sets the wire timestamp assigned by the backend.
    pub fn with_ts(mut self, ts: impl Into<String>) -> Self {
        self.ts = ts.into();
        self
    }

    pub fn with_received_at(mut self, at: DateTime<Local>) -> Self {
        self.received_at = at;
        self
    }

    /// Attaches the bot that owns this event.
    pub fn with_bot(mut self, bot: BoxedBot) -> Self {
        self.bot = Some(bot);
        self
    }

    pub(crate) fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
    }

    // ─── accessors ───

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Arguments captured by a command registered with tokens, split on whitespace.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn reaction(&self) -> Option<&str> {
        self.reaction.as_deref()
    }

    pub fn ts(&self) -> &str {
        &self.ts
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn bot(&self) -> Option<&BoxedBot> {
        self.bot.as_ref()
    }

    /// Correlation id: channel id followed by the wire timestamp.
    pub fn id(&self) -> String {
        format!("{}{}", self.channel, self.ts)
    }

    // ─── talking back ───

    fn require_bot(&self) -> TransportResult<&BoxedBot> {
        self.bot.as_ref().ok_or(TransportError::Detached)
    }

    /// Posts `text` to the event's channel.
    pub async fn say(&self, text: impl AsRef<str>) -> TransportResult<()> {
        self.require_bot()?.send(self, text.as_ref()).await
    }

    /// Posts `text` prefixed with a mention of the event's user.
    pub async fn reply(&self, text: impl AsRef<str>) -> TransportResult<()> {
        let text = format!("{}: {}", self.user.mention(), text.as_ref());
        self.require_bot()?.send(self, &text).await
    }

    /// Sends `text` privately to the event's user.
    pub async fn direct(&self, text: impl AsRef<str>) -> TransportResult<()> {
        self.require_bot()?.send_private(self, text.as_ref()).await
    }

    /// Posts `text` and runs `on_confirm` once the event's user reacts with `reaction`.
    ///
    /// The confirmation expires after three minutes.
    pub async fn say_with_confirmation<H>(
        &self,
        text: impl AsRef<str>,
        reaction: impl Into<String>,
        on_confirm: H,
    ) -> TransportResult<()>
    where
        H: Handler + 'static,
    {
        self.require_bot()?
            .send_with_confirmation(self, text.as_ref(), &reaction.into(), Arc::new(on_confirm))
            .await
    }

    /// Posts `text` and captures the next message from the same user on the same channel.
    pub async fn say_require_response(&self, text: impl AsRef<str>) -> TransportResult<PendingResponse> {
        self.require_bot()?
            .send_require_response(self, text.as_ref())
            .await
    }

    /// Uploads a file to the event's channel.
    pub async fn attach(&self, attachment: Attachment) -> TransportResult<()> {
        self.require_bot()?.attach(self, attachment).await
    }

    /// Runs `work` while the typing indicator is shown on the event's channel.
    pub async fn with_typing_indicator<F>(&self, work: F) -> TransportResult<F::Output>
    where
        F: Future,
    {
        let indicator = self.require_bot()?.with_typing_indicator(&self.channel);
        let _guard = indicator.drop_guard();
        Ok(work.await)
    }

    /// Returns a link to this event's message.
    pub async fn permalink(&self) -> TransportResult<String> {
        self.require_bot()?.permalink(self).await
    }

    /// Resolves the display name of the event's channel.
    pub async fn channel_name(&self) -> TransportResult<String> {
        let info = self.require_bot()?.channel_info(&self.channel).await?;
        Ok(info.name)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .field("user", &self.user.id)
            .field("text", &self.text)
            .field("argv", &self.argv)
            .field("reaction", &self.reaction)
            .field("ts", &self.ts)
            .field("attached", &self.bot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_joins_channel_and_ts() {
        let event = Event::message("C1", User::new("U1", "alice"), "hi").with_ts("1700000000.0001");
        assert_eq!(event.id(), "C11700000000.0001");
    }

    #[test]
    fn user_mention_and_display() {
        let user = User::new("U42", "bob");
        assert_eq!(user.mention(), "<@U42>");
        assert_eq!(user.to_string(), "bob");
    }

    #[test]
    fn reaction_event_correlates_with_reacted_message() {
        let posted = Event::message("C1", User::default(), "deploy?").with_ts("99.1");
        let reaction = Event::reaction_added("C1", "99.1", User::new("U1", "alice"), "ok");
        assert_eq!(reaction.id(), posted.id());
        assert_eq!(reaction.reaction(), Some("ok"));
        assert_eq!(reaction.kind(), EventKind::ReactionAdded);
    }

    #[tokio::test]
    async fn detached_event_cannot_talk_back() {
        let event = Event::scheduled("C1");
        assert!(matches!(event.say("hello").await, Err(TransportError::Detached)));
        assert!(matches!(
            event.with_typing_indicator(async {}).await,
            Err(TransportError::Detached)
        ));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::PresenceChange).unwrap();
        assert_eq!(json, "\"presence_change\"");
    }
}
