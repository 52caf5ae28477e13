//! Handler trait for event callbacks.
//!
//! A handler is anything that can be called with an `Arc<Event>` and returns
//! a boxed future. The blanket implementation covers plain async functions
//! and closures, so bot authors rarely implement [`Handler`] by hand:
//!
//! ```rust,ignore
//! async fn ping(event: Arc<Event>) -> HandlerResult {
//!     event.reply("pong").await?;
//!     Ok(())
//! }
//!
//! async fn log_only(event: Arc<Event>) {
//!     tracing::info!(text = event.text(), "seen");
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::foundation::error::{BoxError, HandlerResult};
use crate::foundation::event::Event;

// ============================================================================
// IntoHandlerResult - Normalize handler return values
// ============================================================================

/// Return types a handler may produce.
///
/// `()` always counts as success; `Result<(), E>` counts as success only when `Ok`.
pub trait IntoHandlerResult: Send {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<BoxError> + Send,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// An event callback.
pub trait Handler: Send + Sync {
    /// Starts handling `event`. The returned future owns everything it needs.
    fn call(&self, event: Arc<Event>) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult,
{
    fn call(&self, event: Arc<Event>) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(event);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// Shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a handler for storage in the dispatch table or scheduler.
pub fn boxed<H: Handler + 'static>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
