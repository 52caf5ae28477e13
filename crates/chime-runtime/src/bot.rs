//! The runtime's implementation of the bot back-reference.
//!
//! Every event the runtime dispatches carries a [`RuntimeBot`]. Outbound calls
//! are forwarded to the connector under the bot's name; ephemeral follow-ups
//! (confirmations and required responses) are registered with the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use chime_core::{
    Attachment, Bot, BoxedConnector, BoxedHandler, BoxedStore, ChannelInfo, Dispatcher, Event,
    PendingResponse, TransportResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bot handle shared by all events of one runtime.
pub struct RuntimeBot {
    name: String,
    connector: BoxedConnector,
    dispatcher: Dispatcher,
    store: BoxedStore,
    /// Root of every typing-indicator token; cancelled at shutdown.
    scope: CancellationToken,
}

impl RuntimeBot {
    pub fn new(
        name: impl Into<String>,
        connector: BoxedConnector,
        dispatcher: Dispatcher,
        store: BoxedStore,
        scope: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            dispatcher,
            store,
            scope,
        }
    }
}

#[async_trait]
impl Bot for RuntimeBot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &Event, text: &str) -> TransportResult<()> {
        self.connector.send(event, &self.name, text).await
    }

    async fn send_with_confirmation(
        &self,
        event: &Event,
        text: &str,
        reaction: &str,
        on_confirm: BoxedHandler,
    ) -> TransportResult<()> {
        let ts = self
            .connector
            .send_with_confirmation(event, &self.name, text)
            .await?;

        // Events without a user (scheduled ones) accept the reaction from anyone.
        let user = Some(event.user().id.clone()).filter(|id| !id.is_empty());
        let correlation = format!("{}{}", event.channel(), ts);
        debug!(%correlation, reaction, "awaiting confirmation");
        self.dispatcher
            .register_ephemeral_reaction(correlation, reaction, user, on_confirm);
        Ok(())
    }

    async fn send_require_response(
        &self,
        event: &Event,
        text: &str,
    ) -> TransportResult<PendingResponse> {
        // Registered first so a fast reply cannot slip past it.
        let pending = self
            .dispatcher
            .require_response(event.channel(), event.user().id.clone());
        if let Err(err) = self.connector.send(event, &self.name, text).await {
            pending.cancel();
            return Err(err);
        }
        Ok(pending)
    }

    async fn send_private(&self, event: &Event, text: &str) -> TransportResult<()> {
        self.connector
            .send_private(event, &event.user().id, text)
            .await
    }

    async fn attach(&self, event: &Event, attachment: Attachment) -> TransportResult<()> {
        self.connector.attach(event, attachment).await
    }

    fn with_typing_indicator(&self, channel: &str) -> CancellationToken {
        if self.scope.is_cancelled() {
            warn!(channel, "typing indicator requested after shutdown");
        }
        self.connector.with_typing_indicator(channel, &self.scope)
    }

    async fn channel_info(&self, channel: &str) -> TransportResult<ChannelInfo> {
        self.connector.channel_info(channel).await
    }

    async fn permalink(&self, event: &Event) -> TransportResult<String> {
        self.connector.permalink(event).await
    }

    fn help(&self) -> String {
        self.dispatcher.help().join("\n")
    }

    fn store(&self) -> BoxedStore {
        Arc::clone(&self.store)
    }
}

impl std::fmt::Debug for RuntimeBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBot")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chime_core::{DispatchMode, NoopStore, User};

    use super::*;
    use crate::testing::ScriptedConnector;

    fn bot(connector: &Arc<ScriptedConnector>, dispatcher: &Dispatcher) -> Arc<RuntimeBot> {
        Arc::new(RuntimeBot::new(
            "chime",
            connector.clone(),
            dispatcher.clone(),
            Arc::new(NoopStore),
            CancellationToken::new(),
        ))
    }

    fn message(user: &str, text: &str) -> Event {
        Event::message("C1", User::new(user, user), text)
    }

    #[tokio::test]
    async fn failed_send_withdraws_the_pending_response() {
        let (connector, _sent) = ScriptedConnector::new(0, true);
        let dispatcher = Dispatcher::new();
        let bot = bot(&connector, &dispatcher);
        connector.fail_sends.store(true, Ordering::SeqCst);

        let event = message("U1", "chime ask");
        tokio_test::assert_err!(bot.send_require_response(&event, "name?").await);
        assert!(
            !dispatcher
                .handle(message("U1", "alice"), DispatchMode::Inline)
                .await
        );
    }

    #[tokio::test]
    async fn confirmation_waits_for_the_same_user_and_reaction() {
        let (connector, mut sent) = ScriptedConnector::new(0, true);
        let dispatcher = Dispatcher::new();
        let bot = bot(&connector, &dispatcher);
        let confirmed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&confirmed);

        let event = message("U1", "chime deploy");
        bot.send_with_confirmation(
            &event,
            "sure?",
            "+1",
            Arc::new(move |_event: Arc<Event>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await
        .unwrap();
        assert_eq!(sent.recv().await.unwrap(), "chime: sure?");

        let ts = "1700000000.000100";
        let react = |user: &str, reaction: &str| {
            Event::reaction_added("C1", ts, User::new(user, user), reaction)
        };
        assert!(!dispatcher.handle(react("U2", "+1"), DispatchMode::Inline).await);
        assert!(!dispatcher.handle(react("U1", "-1"), DispatchMode::Inline).await);
        assert!(dispatcher.handle(react("U1", "+1"), DispatchMode::Inline).await);
        assert!(!dispatcher.handle(react("U1", "+1"), DispatchMode::Inline).await);
        assert_eq!(confirmed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outbound_calls_use_the_bot_name_and_event_user() {
        let (connector, mut sent) = ScriptedConnector::new(0, true);
        let dispatcher = Dispatcher::new();
        let bot = bot(&connector, &dispatcher);
        let event = message("U7", "hi");

        bot.send(&event, "hello").await.unwrap();
        bot.send_private(&event, "psst").await.unwrap();
        assert_eq!(sent.recv().await.unwrap(), "chime: hello");
        assert_eq!(sent.recv().await.unwrap(), "@U7: psst");
        assert_eq!(bot.permalink(&event).await.unwrap(), format!("scripted://{}", event.id()));
    }

    #[test]
    fn typing_indicators_end_with_the_bot_scope() {
        let (connector, _sent) = ScriptedConnector::new(0, true);
        let scope = CancellationToken::new();
        let bot = RuntimeBot::new(
            "chime",
            connector,
            Dispatcher::new(),
            Arc::new(NoopStore),
            scope.clone(),
        );

        let typing = bot.with_typing_indicator("C1");
        assert!(!typing.is_cancelled());
        scope.cancel();
        assert!(typing.is_cancelled());
    }
}
