//! The bot back-reference carried by events.
//!
//! Handlers talk back through the [`Bot`] attached to their event. The runtime
//! provides the implementation; it forwards outbound operations to the
//! connector and registers ephemeral handlers with the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::foundation::error::TransportResult;
use crate::foundation::event::Event;
use crate::framework::dispatcher::PendingResponse;
use crate::framework::handler::BoxedHandler;
use crate::integration::connector::{Attachment, ChannelInfo};
use crate::integration::store::BoxedStore;

/// Outbound API of a running bot.
#[async_trait]
pub trait Bot: Send + Sync {
    /// The bot's name, also the prefix commands are anchored to.
    fn name(&self) -> &str;

    /// Posts `text` to the event's channel.
    async fn send(&self, event: &Event, text: &str) -> TransportResult<()>;

    /// Posts `text` and arms `on_confirm` for when the event's user adds
    /// `reaction` to the posted message.
    async fn send_with_confirmation(
        &self,
        event: &Event,
        text: &str,
        reaction: &str,
        on_confirm: BoxedHandler,
    ) -> TransportResult<()>;

    /// Posts `text` and captures the event user's next message on the same channel.
    async fn send_require_response(&self, event: &Event, text: &str) -> TransportResult<PendingResponse>;

    /// Sends `text` privately to the event's user.
    async fn send_private(&self, event: &Event, text: &str) -> TransportResult<()>;

    async fn attach(&self, event: &Event, attachment: Attachment) -> TransportResult<()>;

    /// Starts the typing indicator on `channel`. Cancel the token to stop it.
    fn with_typing_indicator(&self, channel: &str) -> CancellationToken;

    async fn channel_info(&self, channel: &str) -> TransportResult<ChannelInfo>;

    async fn permalink(&self, event: &Event) -> TransportResult<String>;

    /// Help text listing registered commands.
    fn help(&self) -> String;

    /// The bot's persistence backend.
    fn store(&self) -> BoxedStore;
}

/// Shared bot handle.
pub type BoxedBot = Arc<dyn Bot>;
