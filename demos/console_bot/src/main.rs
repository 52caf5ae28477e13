//! Console Bot Example
//!
//! Talks to the Chime runtime over stdin and stdout, so every feature can be
//! tried without a chat backend.
//!
//! # Input
//!
//! ```text
//! chime ping                 -> pong
//! chime echo some words      -> some words
//! chime remember tea green   -> stores "green" under "tea"
//! chime recall tea           -> green
//! chime ask                  -> asks for your name, waits for the next line
//! chime deploy               -> asks for a +1 reaction before "deploying"
//! +1                         -> reacts to the bot's last message
//! thanks                     -> heard anywhere in a line
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --user alice
//! cargo run --package console-bot -- --sync   # one line at a time
//! ```
//!
//! With `--sync` the next line is read only after the current one is handled,
//! so `ask` cannot see its answer and gives up after a minute.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chime::core::TICK;
use chime::prelude::*;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const CHANNEL: &str = "console";

#[derive(Debug, Parser)]
#[command(about = "Chat with a Chime bot from the terminal")]
struct Args {
    /// Name the bot answers to.
    #[arg(long, default_value = "chime")]
    name: String,

    /// Who you are in the conversation.
    #[arg(long, default_value = "you")]
    user: String,

    /// Handle each line before reading the next one.
    #[arg(long)]
    sync: bool,

    /// Configuration file; `chime.toml` in the working directory otherwise.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

// ============================================================================
// Console Connector
// ============================================================================

/// Connector over the process's stdin and stdout.
struct ConsoleConnector {
    user: User,
    synchronous: bool,
    lines: Mutex<Lines<BufReader<Stdin>>>,
    events: EventQueue,
    idle: IdleSignal,
    /// Timestamp of the bot's last message, the target of `+reaction` lines.
    last_ts: Mutex<Option<String>>,
    next_ts: AtomicU64,
    /// Cancelled when stdin reaches end of file.
    shutdown: CancellationToken,
}

impl ConsoleConnector {
    fn new(user: &str, synchronous: bool, shutdown: CancellationToken) -> Self {
        Self {
            user: User::new(user, user),
            synchronous,
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            events: EventQueue::new(),
            idle: IdleSignal::new(),
            last_ts: Mutex::new(None),
            next_ts: AtomicU64::new(1),
            shutdown,
        }
    }

    async fn to_event(&self, line: &str) -> Option<Event> {
        match line.strip_prefix('+') {
            Some(reaction) => {
                let ts = self.last_ts.lock().await.clone()?;
                Some(Event::reaction_added(
                    CHANNEL,
                    ts,
                    self.user.clone(),
                    reaction.trim(),
                ))
            }
            None => Some(Event::message(CHANNEL, self.user.clone(), line)),
        }
    }

    async fn post(&self, username: &str, text: &str) -> String {
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst).to_string();
        println!("[{username}] {text}");
        *self.last_ts.lock().await = Some(ts.clone());
        ts
    }
}

#[async_trait]
impl Connector for ConsoleConnector {
    async fn connect(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::connection_failed("stdin is closed"));
        }
        Ok(())
    }

    async fn listen(&self) -> TransportResult<()> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.shutdown.cancel();
                    return Err(TransportError::connection_closed("end of input"));
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(event) = self.to_event(line).await else {
                debug!("reaction without a message to react to");
                continue;
            };
            if !self.events.push(event) {
                return Err(TransportError::connection_closed("event queue closed"));
            }
            if self.synchronous {
                self.idle.wait().await;
            }
        }
    }

    fn received_events(&self) -> &EventQueue {
        &self.events
    }

    fn idle(&self) -> &IdleSignal {
        &self.idle
    }

    fn is_async(&self) -> bool {
        !self.synchronous
    }

    async fn send(&self, _event: &Event, username: &str, text: &str) -> TransportResult<()> {
        self.post(username, text).await;
        Ok(())
    }

    async fn send_with_confirmation(
        &self,
        _event: &Event,
        username: &str,
        text: &str,
    ) -> TransportResult<String> {
        Ok(self.post(username, text).await)
    }

    async fn send_private(&self, _event: &Event, user_id: &str, text: &str) -> TransportResult<()> {
        println!("[private to {user_id}] {text}");
        Ok(())
    }

    async fn attach(&self, _event: &Event, attachment: Attachment) -> TransportResult<()> {
        println!(
            "[file] {} ({}, {} bytes)",
            attachment.title,
            attachment.file_name,
            attachment.content.len()
        );
        Ok(())
    }

    fn with_typing_indicator(&self, channel: &str, scope: &CancellationToken) -> CancellationToken {
        println!("... typing in #{channel}");
        scope.child_token()
    }

    async fn channel_info(&self, channel: &str) -> TransportResult<ChannelInfo> {
        Ok(ChannelInfo {
            id: channel.to_string(),
            name: channel.to_string(),
        })
    }

    async fn permalink(&self, event: &Event) -> TransportResult<String> {
        Ok(format!("console://{}/{}", event.channel(), event.ts()))
    }
}

// ============================================================================
// Handler Functions
// ============================================================================

async fn ping(event: Arc<Event>) -> HandlerResult {
    event.reply("pong").await?;
    Ok(())
}

async fn help(event: Arc<Event>) -> HandlerResult {
    let text = event.bot().map(|bot| bot.help()).unwrap_or_default();
    event.say(format!("I know these commands:\n{text}")).await?;
    Ok(())
}

async fn echo(event: Arc<Event>) -> HandlerResult {
    if event.argv().is_empty() {
        event.reply("echo what?").await?;
    } else {
        event.say(event.argv().join(" ")).await?;
    }
    Ok(())
}

async fn remember(event: Arc<Event>) -> HandlerResult {
    let Some(bot) = event.bot() else {
        return Ok(());
    };
    match event.argv() {
        [key, value @ ..] if !value.is_empty() => {
            bot.store()
                .set_json("notes", key, &value.join(" "))
                .await?;
            event.reply(format!("noted {key}")).await?;
        }
        _ => event.reply("usage: remember <key> <value>").await?,
    }
    Ok(())
}

async fn recall(event: Arc<Event>) -> HandlerResult {
    let (Some(bot), Some(key)) = (event.bot(), event.argv().first()) else {
        return Ok(());
    };
    match bot.store().get_json::<String>("notes", key).await {
        Ok(value) => event.reply(value).await?,
        Err(e) if e.is_not_found() => event.reply(format!("nothing stored for {key}")).await?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn ask(event: Arc<Event>) -> HandlerResult {
    let pending = event.say_require_response("What's your name?").await?;
    match pending.recv_timeout(Duration::from_secs(60)).await {
        Some(name) => event.say(format!("Nice to meet you, {name}!")).await?,
        None => event.say("Never mind.").await?,
    }
    Ok(())
}

async fn deploy(event: Arc<Event>) -> HandlerResult {
    let go_ahead = |event: Arc<Event>| async move {
        event
            .with_typing_indicator(tokio::time::sleep(Duration::from_secs(2)))
            .await?;
        event.say("Deployed.").await
    };
    event
        .say_with_confirmation("About to deploy. React with +1 to go ahead.", "+1", go_ahead)
        .await?;
    Ok(())
}

async fn thanks(event: Arc<Event>) -> HandlerResult {
    event.say("You're welcome!").await?;
    Ok(())
}

async fn heartbeat(event: Arc<Event>) -> HandlerResult {
    event.say("Still here.").await?;
    Ok(())
}

async fn good_morning(event: Arc<Event>) -> HandlerResult {
    event.say("Good morning!").await?;
    Ok(())
}

fn register(registry: &mut HandlerRegistry) -> RegistryResult<()> {
    registry
        .on_command("ping", "replies with pong", ping)?
        .on_command("help", "lists the commands", help)?
        .on_command_with_args("echo", "repeats the rest of the line", echo)?
        .on_command_with_args("remember", "stores a note under a key", remember)?
        .on_command_with_args("recall", "reads a stored note", recall)?
        .on_command("ask", "asks for your name", ask)?
        .on_command("deploy", "deploys after a +1 confirmation", deploy)?
        .hear(r"(?i)\bthanks?\b", thanks)?
        .every(TICK * 30, CHANNEL, heartbeat)?
        .on_schedule(Recurrence::Daily, 9, 0, CHANNEL, good_morning)?;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ends the run on Ctrl+C or at the end of input
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let mut builder = ChimeRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let mut defaults = ChimeConfig::default();
    defaults.bot.name = args.name.clone();

    let runtime = builder
        .merge(defaults)
        .connector(ConsoleConnector::new(&args.user, args.sync, shutdown.clone()))
        .store(MemoryStore::new())
        .on_error(|event, failure| error!(channel = event.channel(), %failure, "handler failed"))
        .handlers(register)
        .build()?;

    let name = &runtime.config().bot.name;
    info!(bot = %name, "type `{name} help` to get started");

    runtime.run_until(shutdown).await?;
    Ok(())
}
