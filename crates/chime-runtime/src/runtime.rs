//! Bot orchestration: connection lifecycle, event loop and shutdown.
//!
//! A [`ChimeRuntime`] drives one connector. It connects with capped linear
//! backoff, then serves a single loop that selects between inbound events,
//! scheduler triggers, the stream's terminal error and shutdown:
//!
//! ```text
//!            ┌──────────────┐  fail (n ≤ max)   ┌──────────────┐
//!  start ──▶ │  Connecting  │ ────────────────▶ │ Reconnecting │ sleep n × base
//!            └──────────────┘ ◀──────────────── └──────────────┘
//!                   │ ok                fail (n > max) ──▶ fatal
//!                   ▼
//!            ┌──────────────┐  stream error
//!            │  Receiving   │ ──────────────▶ Connecting
//!            └──────────────┘
//!                   │ shutdown
//!                   ▼
//!               ShutDown
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let runtime = ChimeRuntime::builder()
//!     .connector(MyConnector::new())
//!     .handlers(|registry| {
//!         registry.on_command("ping", "replies with pong", ping)?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! // Until Ctrl+C / SIGTERM
//! runtime.run().await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chime_core::{
    BoxedBot, BoxedConnector, BoxedStore, Clock, Connector, DispatchMode, Dispatcher, ErrorHook,
    Event, HandlerFailure, NoopStore, ScheduleEntry, Scheduler, Store, TransportError, UserFilter,
};
use chime_framework::{HandlerRegistry, RegistryResult};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::bot::RuntimeBot;
use crate::config::{ChimeConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::state::{ConnectionState, RuntimeStats, StatsSnapshot};

/// How a receive phase ended.
enum Receive {
    /// The stream failed; reconnect.
    Disconnected(TransportError),
    /// Shutdown was requested.
    Stopped,
}

/// Orchestrates one bot: connector, dispatcher, scheduler and store.
pub struct ChimeRuntime {
    config: ChimeConfig,
    connector: BoxedConnector,
    store: BoxedStore,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    bot: BoxedBot,
    /// Parent of every token the runtime hands out.
    root: CancellationToken,
    state: watch::Sender<ConnectionState>,
    stats: Arc<RuntimeStats>,
    started: AtomicBool,
}

impl ChimeRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &ChimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The bot handle attached to every dispatched event.
    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    pub fn store(&self) -> &BoxedStore {
        &self.store
    }

    /// Help text of the registered commands, one per line.
    pub fn help(&self) -> String {
        self.bot.help()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Requests an orderly shutdown of a running runtime.
    pub fn stop(&self) {
        self.root.cancel();
    }

    /// Runs until Ctrl+C or SIGTERM, or until the connector gives up.
    pub async fn run(&self) -> RuntimeResult<()> {
        let shutdown = CancellationToken::new();
        let signals = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown().await;
                shutdown.cancel();
            })
        };

        info!(bot = %self.config.bot.name, "Chime runtime is running. Press Ctrl+C to stop.");
        let result = self.run_until(shutdown).await;
        signals.abort();
        result
    }

    /// Runs until `shutdown` is cancelled, [`Self::stop`] is called, or the
    /// connector fails more often in a row than `connection.max_retries`.
    ///
    /// A runtime runs at most once.
    pub async fn run_until(&self, shutdown: CancellationToken) -> RuntimeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        let forward = {
            let root = self.root.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => root.cancel(),
                    _ = root.cancelled() => {}
                }
            })
        };
        let ticker = {
            let scheduler = self.scheduler.clone();
            let token = self.root.child_token();
            tokio::spawn(async move { scheduler.start(token).await })
        };

        let span = info_span!("bot", name = %self.config.bot.name);
        let served = self.serve().instrument(span.clone()).await;
        let closed = self.finish().instrument(span).await;

        let _ = forward.await;
        let _ = ticker.await;
        served.and(closed)
    }

    // ─── connection lifecycle ───

    async fn serve(&self) -> RuntimeResult<()> {
        let base_backoff = self.config.connection.base_backoff();
        let max_retries = self.config.connection.max_retries;
        let mut retry: u32 = 0;

        loop {
            if retry > 0 {
                let delay = base_backoff * retry;
                self.set_state(ConnectionState::Reconnecting);
                warn!(attempt = retry, delay = ?delay, "reconnecting after backoff");
                tokio::select! {
                    _ = self.root.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(ConnectionState::Connecting);
            self.stats.record_connect_attempt();
            let connected = tokio::select! {
                _ = self.root.cancelled() => return Ok(()),
                result = self.connector.connect() => result,
            };

            if let Err(err) = connected {
                retry += 1;
                if retry > max_retries {
                    error!(attempts = retry, error = %err, "giving up on connecting");
                    return Err(RuntimeError::ConnectFailed {
                        attempts: retry,
                        source: err,
                    });
                }
                warn!(attempt = retry, error = %err, "connect failed");
                continue;
            }

            retry = 0;
            self.set_state(ConnectionState::Connected);
            info!(async_mode = self.connector.is_async(), "connected");

            match self.receive().await {
                Receive::Disconnected(err) => {
                    self.stats.record_disconnect();
                    warn!(
                        error = %err,
                        disconnects = self.stats.snapshot().disconnects,
                        "stream lost, reconnecting"
                    );
                }
                Receive::Stopped => return Ok(()),
            }
        }
    }

    /// Serves one stream until it fails or shutdown is requested.
    async fn receive(&self) -> Receive {
        let (err_tx, mut err_rx) = mpsc::channel::<TransportError>(1);
        let stream = self.root.child_token();
        let listener = {
            let connector = Arc::clone(&self.connector);
            let stream = stream.clone();
            tokio::spawn(
                async move {
                    let ended = tokio::select! {
                        _ = stream.cancelled() => return,
                        ended = connector.listen() => ended,
                    };
                    let err = ended
                        .err()
                        .unwrap_or_else(|| TransportError::connection_closed("stream ended"));
                    let _ = err_tx.send(err).await;
                }
                .in_current_span(),
            )
        };

        let mode = if self.connector.is_async() {
            DispatchMode::Spawn
        } else {
            DispatchMode::Inline
        };
        self.set_state(ConnectionState::Receiving);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break Receive::Stopped,
                err = err_rx.recv() => {
                    break Receive::Disconnected(err.unwrap_or_else(|| {
                        TransportError::connection_closed("listener stopped without an error")
                    }));
                }
                event = self.connector.received_events().recv() => match event {
                    Some(event) => self.dispatch(event, mode).await,
                    None => {
                        break Receive::Disconnected(TransportError::connection_closed(
                            "event queue closed",
                        ));
                    }
                },
                Some(entry) = self.scheduler.next_trigger() => self.run_scheduled(&entry, mode).await,
            }
        };

        stream.cancel();
        let _ = listener.await;
        outcome
    }

    async fn dispatch(&self, event: Event, mode: DispatchMode) {
        trace!(kind = %event.kind(), channel = %event.channel(), "event received");
        let event = event.with_bot(Arc::clone(&self.bot));
        let matched = self.dispatcher.handle(event, mode).await;
        self.stats.record_event(matched);

        if mode == DispatchMode::Inline {
            self.connector.idle().ack();
        }
    }

    /// Scheduled entries skip the user filter and go straight to their callback.
    async fn run_scheduled(&self, entry: &ScheduleEntry, mode: DispatchMode) {
        let Some((event, handler)) = self.scheduler.execute(entry) else {
            return;
        };
        debug!(channel = entry.channel(), next = %entry.next_fire(), "running scheduled entry");
        self.stats.record_scheduled_run();
        let event = Arc::new(event.with_bot(Arc::clone(&self.bot)));
        self.dispatcher.invoke(event, handler, mode).await;
    }

    /// Cancels every child context, drains spawned handlers and closes the store.
    async fn finish(&self) -> RuntimeResult<()> {
        info!("shutting down");
        self.root.cancel();

        let grace = self.config.dispatch.shutdown_grace();
        if !self.dispatcher.shutdown(grace).await {
            warn!(
                in_flight = self.dispatcher.in_flight(),
                grace = ?grace,
                "handlers still running after the grace period"
            );
        }

        let closed = self.store.close().await;
        if let Err(ref err) = closed {
            error!(error = %err, "failed to close store");
        }

        self.set_state(ConnectionState::ShutDown);
        info!(stats = %self.stats.snapshot(), "runtime stopped");
        closed.map_err(RuntimeError::from)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }
}

impl std::fmt::Debug for ChimeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChimeRuntime")
            .field("bot", &self.config.bot.name)
            .field("state", &self.state())
            .field("dispatcher", &self.dispatcher)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "cannot listen for SIGTERM, waiting for Ctrl+C only"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            error!(error = %err, "cannot listen for Ctrl+C, stop the runtime explicitly");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

type RegisterFn = Box<dyn FnOnce(&mut HandlerRegistry) -> RegistryResult<()>>;

/// Builder for a [`ChimeRuntime`].
///
/// ```rust,ignore
/// let runtime = ChimeRuntime::builder()
///     .config_file("config/chime.toml")
///     .profile("production")
///     .connector(connector)
///     .store(MemoryStore::new())
///     .on_error(|event, failure| eprintln!("{}: {failure}", event.channel()))
///     .handlers(register_commands)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<ChimeConfig>,
    connector: Option<BoxedConnector>,
    store: Option<BoxedStore>,
    filter: Option<UserFilter>,
    error_hook: Option<ErrorHook>,
    clock: Option<Arc<dyn Clock>>,
    handlers: Vec<RegisterFn>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            connector: None,
            store: None,
            filter: None,
            error_hook: None,
            clock: None,
            handlers: Vec::new(),
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Adds programmatic defaults. Files and environment variables override them.
    pub fn merge(mut self, config: ChimeConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping file and environment loading.
    pub fn config(mut self, config: ChimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn boxed_connector(mut self, connector: BoxedConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Persistence backend. Defaults to [`NoopStore`].
    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn boxed_store(mut self, store: BoxedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the user gate built from `bot.ignore_users` and `bot.accept_users`.
    pub fn filter(mut self, filter: UserFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Called with the event whenever a handler returns an error or panics.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Event, &HandlerFailure) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Wall clock used by the scheduler.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Registers handlers. The registry is anchored to the configured bot name.
    ///
    /// May be called several times; registrations keep their call order.
    pub fn handlers<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut HandlerRegistry) -> RegistryResult<()> + 'static,
    {
        self.handlers.push(Box::new(register));
        self
    }

    /// Leaves the global tracing subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Builds the runtime. Fails on invalid configuration, a missing
    /// connector or a rejected registration.
    pub fn build(self) -> RuntimeResult<ChimeRuntime> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let connector = self.connector.ok_or(RuntimeError::MissingConnector)?;
        let store = self.store.unwrap_or_else(|| Arc::new(NoopStore));

        let dispatcher =
            Dispatcher::with_filter(self.filter.unwrap_or_else(|| config.bot.user_filter()));
        if let Some(hook) = self.error_hook {
            dispatcher.set_error_hook(move |event, failure| hook(event, failure));
        }
        let scheduler = match self.clock {
            Some(clock) => Scheduler::with_clock(clock),
            None => Scheduler::new(),
        };

        let mut registry = HandlerRegistry::new(config.bot.name.clone());
        for register in self.handlers {
            register(&mut registry)?;
        }
        registry.install(&dispatcher, &scheduler)?;

        let root = CancellationToken::new();
        let bot: BoxedBot = Arc::new(RuntimeBot::new(
            config.bot.name.clone(),
            Arc::clone(&connector),
            dispatcher.clone(),
            Arc::clone(&store),
            root.clone(),
        ));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        info!(
            bot = %config.bot.name,
            async_mode = connector.is_async(),
            schedules = scheduler.len(),
            "Runtime initialized from configuration"
        );

        Ok(ChimeRuntime {
            config,
            connector,
            store,
            dispatcher,
            scheduler,
            bot,
            root,
            state,
            stats: Arc::new(RuntimeStats::default()),
            started: AtomicBool::new(false),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
