//! Message shapes and their handler traits.
//!
//! There are two message traits:
//!
//! - [`Request`]: routed to exactly one [`RequestHandler`]. A request whose
//!   `Response` is `()` is a command; anything else is a query.
//! - [`Notification`]: fanned out to zero or more
//!   [`NotificationHandler`]s.

use async_trait::async_trait;

use crate::DispatchError;

/// A message with exactly one handler and a typed response.
pub trait Request: Send + Sync + 'static {
    /// What the handler returns. `()` for commands.
    type Response: Send + Sync + 'static;

    /// Name used in logs and errors.
    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Handles one request type.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: R) -> Result<R::Response, DispatchError>;
}

/// A message delivered to every subscribed handler.
pub trait Notification: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Subscribes to one notification type.
///
/// Handlers run concurrently with each other, each on its own task, and
/// only see a shared reference to the notification.
#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    async fn handle(&self, notification: &N) -> Result<(), DispatchError>;
}

/// A notification travelling through the request pipeline.
///
/// Publishing wraps the notification in this type so the global stages
/// (error logging, slow-call logging, processors) apply to it exactly as
/// they do to requests. Processors for a notification `N` are registered
/// against `Published<N>`.
#[derive(Debug, Clone)]
pub struct Published<N>(pub N);

impl<N: Notification> Request for Published<N> {
    type Response = ();

    fn name() -> &'static str {
        N::name()
    }
}
