//! Handler registration surface for bot authors.
//!
//! A [`HandlerRegistry`] collects commands, listeners and schedules while the
//! bot is being assembled, then installs them into a [`Dispatcher`] and a
//! [`Scheduler`] in one go. Nothing here is process-global: build a registry,
//! hand it to the runtime builder, done.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = HandlerRegistry::new("chime");
//! registry.on_command("ping", "replies with pong", |event: Arc<Event>| async move {
//!     event.reply("pong").await
//! })?;
//! registry.on_command_with_args("deploy", "deploys a service", deploy)?;
//! registry.hear(r"(?i)\bthanks\b", |event: Arc<Event>| async move {
//!     event.say("any time").await
//! })?;
//! registry.on_schedule(Recurrence::Daily, 9, 30, "C024BE91L", standup)?;
//! ```

use std::time::Duration;

use chime_core::{
    ARGS_GROUP, BoxedHandler, Dispatcher, Handler, Recurrence, Registration, ScheduleError,
    Scheduler, TICK, boxed,
};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};

enum Pending {
    Dispatch(Registration),
    Every {
        interval: Duration,
        channel: String,
        handler: BoxedHandler,
    },
    At {
        recurrence: Recurrence,
        hour: u32,
        minute: u32,
        channel: String,
        handler: BoxedHandler,
    },
}

/// Ordered collection of handler registrations for one bot.
pub struct HandlerRegistry {
    bot_name: String,
    pending: Vec<Pending>,
    help: Vec<String>,
}

impl HandlerRegistry {
    /// Creates an empty registry. Commands are anchored to `bot_name`.
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            pending: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Registers a command: the bot's name, whitespace, then `pattern`, and
    /// nothing else.
    ///
    /// The command is listed in the help text as `pattern - description`,
    /// unless `description` is blank.
    pub fn on_command<H>(
        &mut self,
        pattern: &str,
        description: &str,
        handler: H,
    ) -> RegistryResult<&mut Self>
    where
        H: Handler + 'static,
    {
        let regex = self.anchored(pattern, "")?;
        self.command(regex, pattern, description, false, boxed(handler));
        Ok(self)
    }

    /// Like [`Self::on_command`], but free text after the pattern is split on
    /// whitespace into the event's `argv`.
    pub fn on_command_with_args<H>(
        &mut self,
        pattern: &str,
        description: &str,
        handler: H,
    ) -> RegistryResult<&mut Self>
    where
        H: Handler + 'static,
    {
        let tail = format!(r"(?:\s+(?P<{ARGS_GROUP}>.+))?");
        let regex = self.anchored(pattern, &tail)?;
        self.command(regex, pattern, description, true, boxed(handler));
        Ok(self)
    }

    /// Fires `handler` for any message matching `pattern` anywhere in its text.
    ///
    /// Hear entries are not listed in the help text.
    pub fn hear<H>(&mut self, pattern: &str, handler: H) -> RegistryResult<&mut Self>
    where
        H: Handler + 'static,
    {
        let regex = compile(pattern, pattern)?;
        self.pending
            .push(Pending::Dispatch(Registration::message(regex, boxed(handler))));
        Ok(self)
    }

    /// Fires `handler` on every presence change of `user_id`.
    pub fn on_presence<H>(&mut self, user_id: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.pending
            .push(Pending::Dispatch(Registration::presence(user_id, boxed(handler))));
        self
    }

    /// Fires `handler` every time anyone adds `reaction` to any message.
    pub fn on_reaction<H>(&mut self, reaction: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.pending
            .push(Pending::Dispatch(Registration::reaction(reaction, boxed(handler))));
        self
    }

    /// Fires `handler` on `channel` every `interval`. Intervals under one
    /// minute are rejected.
    pub fn every<H>(
        &mut self,
        interval: Duration,
        channel: impl Into<String>,
        handler: H,
    ) -> RegistryResult<&mut Self>
    where
        H: Handler + 'static,
    {
        if interval < TICK {
            return Err(ScheduleError::IntervalTooSmall { interval }.into());
        }
        self.pending.push(Pending::Every {
            interval,
            channel: channel.into(),
            handler: boxed(handler),
        });
        Ok(self)
    }

    /// Fires `handler` on `channel` at `hour:minute` local time, hourly or daily.
    pub fn on_schedule<H>(
        &mut self,
        recurrence: Recurrence,
        hour: u32,
        minute: u32,
        channel: impl Into<String>,
        handler: H,
    ) -> RegistryResult<&mut Self>
    where
        H: Handler + 'static,
    {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime { hour, minute }.into());
        }
        self.pending.push(Pending::At {
            recurrence,
            hour,
            minute,
            channel: channel.into(),
            handler: boxed(handler),
        });
        Ok(self)
    }

    /// Help lines of the registered commands, in registration order.
    pub fn help(&self) -> &[String] {
        &self.help
    }

    /// Number of registrations collected so far.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Moves every registration into `dispatcher` and `scheduler`, preserving order.
    pub fn install(self, dispatcher: &Dispatcher, scheduler: &Scheduler) -> RegistryResult<()> {
        let mut handlers = 0usize;
        let mut schedules = 0usize;

        for pending in self.pending {
            match pending {
                Pending::Dispatch(registration) => {
                    dispatcher.register(registration)?;
                    handlers += 1;
                }
                Pending::Every {
                    interval,
                    channel,
                    handler,
                } => {
                    scheduler.every(interval, channel, handler)?;
                    schedules += 1;
                }
                Pending::At {
                    recurrence,
                    hour,
                    minute,
                    channel,
                    handler,
                } => {
                    scheduler.at(recurrence, hour, minute, channel, handler)?;
                    schedules += 1;
                }
            }
        }

        info!(bot = %self.bot_name, handlers, schedules, "handlers installed");
        Ok(())
    }

    // ─── helpers ───

    fn anchored(&self, pattern: &str, tail: &str) -> RegistryResult<Regex> {
        let source = format!(
            r"\A{}\s+(?:{}){}\z",
            regex::escape(&self.bot_name),
            pattern,
            tail
        );
        compile(&source, pattern)
    }

    fn command(
        &mut self,
        regex: Regex,
        pattern: &str,
        description: &str,
        with_tokens: bool,
        handler: BoxedHandler,
    ) {
        debug!(pattern, "command registered");
        let mut registration = Registration::message(regex, handler).with_tokens(with_tokens);
        // Undescribed commands stay out of the help text.
        if !description.trim().is_empty() {
            let line = format!("{pattern} - {description}");
            self.help.push(line.clone());
            registration = registration.description(line);
        }
        self.pending.push(Pending::Dispatch(registration));
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("bot_name", &self.bot_name)
            .field("registrations", &self.pending.len())
            .field("help", &self.help)
            .finish()
    }
}

fn compile(source: &str, pattern: &str) -> RegistryResult<Regex> {
    Regex::new(source).map_err(|err| RegistryError::invalid_pattern(pattern, err))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chime_core::{DispatchMode, Event, EventKind, User};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Handler + 'static {
        let counter = Arc::clone(counter);
        move |_event: Arc<Event>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn msg(text: &str) -> Event {
        Event::message("C1", User::new("U1", "alice"), text)
    }

    fn installed(registry: HandlerRegistry) -> (Dispatcher, Scheduler) {
        let dispatcher = Dispatcher::new();
        let scheduler = Scheduler::new();
        registry.install(&dispatcher, &scheduler).unwrap();
        (dispatcher, scheduler)
    }

    #[tokio::test]
    async fn commands_are_anchored_to_bot_name() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_command("ping", "replies with pong", counting(&count))
            .unwrap();
        let (dispatcher, _) = installed(registry);

        assert!(dispatcher.handle(msg("chime ping"), DispatchMode::Inline).await);
        assert!(dispatcher.handle(msg("chime   ping"), DispatchMode::Inline).await);
        for text in ["ping", "chime ping now", "hey chime ping", "chimeping"] {
            assert!(!dispatcher.handle(msg(text), DispatchMode::Inline).await, "{text}");
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn alternation_stays_inside_the_anchor() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_command("hi|hello", "greets", counting(&count))
            .unwrap();
        let (dispatcher, _) = installed(registry);

        assert!(dispatcher.handle(msg("chime hello"), DispatchMode::Inline).await);
        assert!(!dispatcher.handle(msg("well hello"), DispatchMode::Inline).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn command_with_args_splits_trailing_text() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_command_with_args("deploy", "deploys a service", move |event: Arc<Event>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event.argv().to_vec());
                }
            })
            .unwrap();
        let (dispatcher, _) = installed(registry);

        dispatcher
            .handle(msg("chime deploy api  production"), DispatchMode::Inline)
            .await;
        dispatcher.handle(msg("chime deploy"), DispatchMode::Inline).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], vec!["api", "production"]);
        assert!(seen[1].is_empty());
    }

    #[tokio::test]
    async fn capturing_command_pattern_leaves_argv_to_trailing_text() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_command_with_args("deploy (api|web)", "deploys a service", move |event: Arc<Event>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event.argv().to_vec());
                }
            })
            .unwrap();
        let (dispatcher, _) = installed(registry);

        assert!(dispatcher.handle(msg("chime deploy api"), DispatchMode::Inline).await);
        assert!(
            dispatcher
                .handle(msg("chime deploy web canary"), DispatchMode::Inline)
                .await
        );

        let seen = seen.lock().unwrap();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1], vec!["canary"]);
    }

    #[tokio::test]
    async fn hear_matches_anywhere() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("chime");
        registry.hear(r"(?i)\bthanks\b", counting(&count)).unwrap();
        let (dispatcher, _) = installed(registry);

        assert!(dispatcher.handle(msg("ok, Thanks a lot"), DispatchMode::Inline).await);
        assert!(!dispatcher.handle(msg("thanksgiving"), DispatchMode::Inline).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn help_lists_commands_but_not_hear() {
        let noop = || |_event: Arc<Event>| async {};
        let mut registry = HandlerRegistry::new("chime");
        registry.on_command("ping", "replies with pong", noop()).unwrap();
        registry.hear("pong", noop()).unwrap();
        registry
            .on_command_with_args("echo", "repeats its arguments", noop())
            .unwrap();

        let expected = vec!["ping - replies with pong", "echo - repeats its arguments"];
        assert_eq!(registry.help(), expected.as_slice());

        let (dispatcher, _) = installed(registry);
        assert_eq!(dispatcher.help(), expected);
    }

    #[tokio::test]
    async fn undescribed_commands_are_routed_but_not_listed() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_command("ping", "replies with pong", counting(&count))
            .unwrap()
            .on_command("status", "", counting(&count))
            .unwrap()
            .on_command("debug", "  ", counting(&count))
            .unwrap();
        assert_eq!(registry.help(), ["ping - replies with pong"]);

        let (dispatcher, _) = installed(registry);
        assert_eq!(dispatcher.help(), vec!["ping - replies with pong"]);
        assert!(dispatcher.handle(msg("chime status"), DispatchMode::Inline).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_pattern_aborts_registration() {
        let mut registry = HandlerRegistry::new("chime");
        let err = registry
            .on_command("(unclosed", "broken", |_event: Arc<Event>| async {})
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
        assert!(registry.is_empty());
        assert!(registry.help().is_empty());
    }

    #[test]
    fn schedules_are_validated_at_registration() {
        let noop = || |_event: Arc<Event>| async {};
        let mut registry = HandlerRegistry::new("chime");

        let err = registry
            .every(Duration::from_secs(30), "C1", noop())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Schedule(ScheduleError::IntervalTooSmall { .. })
        ));

        let err = registry
            .on_schedule(Recurrence::Daily, 9, 60, "C1", noop())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Schedule(ScheduleError::InvalidTime { hour: 9, minute: 60 })
        ));

        registry.every(TICK, "C1", noop()).unwrap();
        registry
            .on_schedule(Recurrence::Hourly, 0, 15, "C1", noop())
            .unwrap();
        let (_, scheduler) = installed(registry);
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test]
    async fn bot_name_is_matched_literally() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("bot.v2");
        registry.on_command("status", "", counting(&count)).unwrap();
        let (dispatcher, _) = installed(registry);

        assert!(!dispatcher.handle(msg("botxv2 status"), DispatchMode::Inline).await);
        assert!(dispatcher.handle(msg("bot.v2 status"), DispatchMode::Inline).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn presence_and_reaction_listeners_are_installed() {
        let presence = Arc::new(AtomicUsize::new(0));
        let reaction = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new("chime");
        registry
            .on_presence("U1", counting(&presence))
            .on_reaction("eyes", counting(&reaction));
        let (dispatcher, _) = installed(registry);

        assert_eq!(dispatcher.handler_count(EventKind::PresenceChange), 1);
        assert_eq!(dispatcher.handler_count(EventKind::ReactionAdded), 1);

        let alice = User::new("U1", "alice");
        dispatcher
            .handle(Event::presence(alice.clone()), DispatchMode::Inline)
            .await;
        dispatcher
            .handle(
                Event::reaction_added("C1", "1.0", alice, "eyes"),
                DispatchMode::Inline,
            )
            .await;
        assert_eq!(presence.load(Ordering::SeqCst), 1);
        assert_eq!(reaction.load(Ordering::SeqCst), 1);
    }
}
