//! The [`Dispatcher`]: registration, type-keyed caches, send and publish.
//!
//! # How a request travels
//!
//! 1. `send::<R>()` looks `R` up in the sender cache.
//! 2. On a miss it builds a [`RequestSender<R>`]: the global stages, then
//!    the per-type behaviors, then the handler. The result is cached for
//!    the life of the dispatcher.
//! 3. The sender runs the chain.
//!
//! # Caches
//!
//! Both caches are `DashMap`s keyed by `TypeId` holding `Arc<dyn Any>`.
//! The sender is built inside `entry().or_try_insert_with()`, which holds
//! the shard lock, so concurrent first dispatches of the same type all end
//! up with the identical `Arc`. A failed build (no handler) caches nothing.
//!
//! Lock order is always sender cache → registration slots. Registration
//! itself only ever touches the slots.

use std::any::{Any, TypeId};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;

use crate::pipeline::{Behavior, Next, PostProcessor, PreProcessor, Stage};
use crate::{
    DispatchError, Notification, NotificationHandler, Published, Request,
    RequestHandler,
};

type Shared = Arc<dyn Any + Send + Sync>;

/// A request type's handler plus its composed pipeline.
///
/// Built once per type by the [`Dispatcher`] and shared by every caller.
pub struct RequestSender<R: Request> {
    chain: Vec<Arc<dyn Behavior<R>>>,
    handler: Arc<dyn RequestHandler<R>>,
}

impl<R: Request> RequestSender<R> {
    /// Runs `request` through the pipeline.
    pub async fn send(&self, request: R) -> Result<R::Response, DispatchError> {
        Next::new(&self.chain, self.handler.as_ref()).run(request).await
    }

    /// Number of behaviors wrapped around the handler.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }
}

/// Everything registered for one request type before its sender is built.
struct RequestSlot<R: Request> {
    handler: Option<Arc<dyn RequestHandler<R>>>,
    behaviors: Vec<Arc<dyn Behavior<R>>>,
    pre: Vec<Arc<dyn PreProcessor<R>>>,
    post: Vec<Arc<dyn PostProcessor<R>>>,
    sealed: bool,
}

impl<R: Request> Default for RequestSlot<R> {
    fn default() -> Self {
        Self {
            handler: None,
            behaviors: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
            sealed: false,
        }
    }
}

/// The subscribers of one notification type.
///
/// Shared between the registry and the cached publisher, so subscribing
/// after the first publish still takes effect.
struct Subscribers<N: Notification> {
    handlers: RwLock<Vec<Arc<dyn NotificationHandler<N>>>>,
}

impl<N: Notification> Subscribers<N> {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, handler: Arc<dyn NotificationHandler<N>>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationHandler<N>>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The innermost handler of `Published<N>`: runs every subscriber on its
/// own task and waits for all of them.
struct FanOut<N: Notification> {
    subscribers: Arc<Subscribers<N>>,
}

#[async_trait]
impl<N: Notification> RequestHandler<Published<N>> for FanOut<N> {
    async fn handle(&self, published: Published<N>) -> Result<(), DispatchError> {
        let handlers = self.subscribers.snapshot();
        if handlers.is_empty() {
            tracing::trace!(notification = N::name(), "no subscribers");
            return Ok(());
        }

        let notification = Arc::new(published.0);
        let tasks = handlers.into_iter().map(|handler| {
            let notification = Arc::clone(&notification);
            tokio::spawn(async move { handler.handle(&notification).await })
        });

        // Results come back in subscription order regardless of which task
        // finished first.
        let mut failed = 0;
        let mut first = None;
        for joined in join_all(tasks).await {
            let outcome = joined.unwrap_or_else(|e| {
                tracing::error!(
                    notification = N::name(),
                    error = %e,
                    "notification handler panicked"
                );
                Err(DispatchError::HandlerPanicked { message: N::name() })
            });
            if let Err(e) = outcome {
                failed += 1;
                first.get_or_insert(e);
            }
        }

        match first {
            None => Ok(()),
            Some(source) => Err(DispatchError::Notification {
                message: N::name(),
                failed,
                source: Box::new(source),
            }),
        }
    }
}

struct Inner {
    stages: Vec<Stage>,
    requests: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    subscribers: DashMap<TypeId, Shared>,
    senders: DashMap<TypeId, Shared>,
}

/// Routes requests to their single handler and notifications to all of
/// their subscribers.
///
/// Cloning is cheap: clones share the same registrations and caches.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use trailhead_dispatch::{DispatchError, Dispatcher, Request, RequestHandler};
///
/// struct Add(u32, u32);
/// impl Request for Add {
///     type Response = u32;
/// }
///
/// struct Adder;
/// #[async_trait]
/// impl RequestHandler<Add> for Adder {
///     async fn handle(&self, req: Add) -> Result<u32, DispatchError> {
///         Ok(req.0 + req.1)
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dispatcher = Dispatcher::new();
/// dispatcher.register_handler::<Add, _>(Adder).unwrap();
/// assert_eq!(dispatcher.send(Add(2, 3)).await.unwrap(), 5);
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// A dispatcher with [`Stage::defaults`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts a builder with [`Stage::defaults`].
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// The global stages, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.inner.stages
    }

    /// Registers the single handler for `R`.
    ///
    /// # Errors
    /// [`DispatchError::AlreadyRegistered`] if `R` already has one.
    pub fn register_handler<R, H>(&self, handler: H) -> Result<(), DispatchError>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.with_slot::<R, _>(|slot| {
            if slot.handler.is_some() {
                return Err(DispatchError::AlreadyRegistered { message: R::name() });
            }
            slot.handler = Some(Arc::new(handler));
            Ok(())
        })?;
        tracing::debug!(request = R::name(), "request handler registered");
        Ok(())
    }

    /// Adds a per-type behavior. Per-type behaviors run inside the global
    /// stages, in the order they were added.
    ///
    /// # Errors
    /// [`DispatchError::Sealed`] once `R` has been dispatched.
    pub fn add_behavior<R, B>(&self, behavior: B) -> Result<(), DispatchError>
    where
        R: Request,
        B: Behavior<R>,
    {
        self.with_slot::<R, _>(|slot| {
            slot.behaviors.push(Arc::new(behavior));
            Ok(())
        })
    }

    /// Adds a pre-processor, run by [`Stage::PreProcessing`].
    ///
    /// # Errors
    /// [`DispatchError::Sealed`] once `R` has been dispatched.
    pub fn add_pre_processor<R, P>(&self, processor: P) -> Result<(), DispatchError>
    where
        R: Request,
        P: PreProcessor<R>,
    {
        self.with_slot::<R, _>(|slot| {
            slot.pre.push(Arc::new(processor));
            Ok(())
        })
    }

    /// Adds a post-processor, run by [`Stage::PostProcessing`].
    ///
    /// # Errors
    /// [`DispatchError::Sealed`] once `R` has been dispatched.
    pub fn add_post_processor<R, P>(&self, processor: P) -> Result<(), DispatchError>
    where
        R: Request,
        P: PostProcessor<R>,
    {
        self.with_slot::<R, _>(|slot| {
            slot.post.push(Arc::new(processor));
            Ok(())
        })
    }

    /// Subscribes a handler to `N`. Takes effect immediately, even if `N`
    /// has already been published.
    pub fn subscribe<N, H>(&self, handler: H)
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        self.subscribers::<N>().push(Arc::new(handler));
        tracing::debug!(notification = N::name(), "notification handler subscribed");
    }

    /// Number of handlers subscribed to `N`.
    pub fn subscriber_count<N: Notification>(&self) -> usize {
        self.subscribers::<N>().len()
    }

    /// Sends a request to its handler through the pipeline.
    ///
    /// # Errors
    /// [`DispatchError::NoHandler`] when nothing handles `R`, otherwise
    /// whatever the pipeline or handler returns.
    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response, DispatchError> {
        self.sender::<R>()?.send(request).await
    }

    /// Publishes a notification to every subscriber and waits for all of
    /// them.
    ///
    /// # Errors
    /// [`DispatchError::Notification`] if any subscriber failed; it is
    /// returned only after every subscriber has finished.
    pub async fn publish<N: Notification>(&self, notification: N) -> Result<(), DispatchError> {
        let sender = self.cached::<Published<N>, _>(|| {
            let fan_out: Arc<dyn RequestHandler<Published<N>>> = Arc::new(FanOut {
                subscribers: self.subscribers::<N>(),
            });
            Ok(fan_out)
        })?;
        sender.send(Published(notification)).await
    }

    /// Returns the cached sender for `R`, building it on first use.
    ///
    /// # Errors
    /// [`DispatchError::NoHandler`] when nothing handles `R`. Nothing is
    /// cached in that case, so registering a handler later still works.
    pub fn sender<R: Request>(&self) -> Result<Arc<RequestSender<R>>, DispatchError> {
        self.cached::<R, _>(|| {
            self.with_slot_ref::<R, _>(|slot| slot.and_then(|s| s.handler.clone()))
                .ok_or(DispatchError::NoHandler { message: R::name() })
        })
    }

    fn cached<R, F>(&self, handler: F) -> Result<Arc<RequestSender<R>>, DispatchError>
    where
        R: Request,
        F: FnOnce() -> Result<Arc<dyn RequestHandler<R>>, DispatchError>,
    {
        let key = TypeId::of::<R>();
        let shared = match self.inner.senders.get(&key) {
            Some(hit) => Arc::clone(hit.value()),
            None => {
                let entry = self
                    .inner
                    .senders
                    .entry(key)
                    .or_try_insert_with(|| {
                        let handler = handler()?;
                        let sender: Shared = Arc::new(self.build::<R>(handler));
                        tracing::debug!(request = R::name(), "pipeline built");
                        Ok::<_, DispatchError>(sender)
                    })?;
                Arc::clone(entry.value())
            }
        };
        shared
            .downcast::<RequestSender<R>>()
            .map_err(|_| DispatchError::CacheMismatch { message: R::name() })
    }

    /// Composes the chain for `R` and seals its slot.
    fn build<R: Request>(&self, handler: Arc<dyn RequestHandler<R>>) -> RequestSender<R> {
        let mut slot_entry = self
            .inner
            .requests
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(RequestSlot::<R>::default()));

        let mut chain = Vec::new();
        if let Some(slot) = slot_entry.downcast_mut::<RequestSlot<R>>() {
            slot.sealed = true;
            chain.extend(
                self.inner
                    .stages
                    .iter()
                    .map(|stage| stage.behavior::<R>(&slot.pre, &slot.post)),
            );
            chain.extend(slot.behaviors.iter().cloned());
        }
        RequestSender { chain, handler }
    }

    fn with_slot<R, F>(&self, f: F) -> Result<(), DispatchError>
    where
        R: Request,
        F: FnOnce(&mut RequestSlot<R>) -> Result<(), DispatchError>,
    {
        let mut entry = self
            .inner
            .requests
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(RequestSlot::<R>::default()));
        let slot = entry
            .downcast_mut::<RequestSlot<R>>()
            .ok_or(DispatchError::CacheMismatch { message: R::name() })?;
        if slot.sealed {
            return Err(DispatchError::Sealed { message: R::name() });
        }
        f(slot)
    }

    fn with_slot_ref<R, T>(&self, f: impl FnOnce(Option<&RequestSlot<R>>) -> T) -> T
    where
        R: Request,
    {
        let entry = self.inner.requests.get(&TypeId::of::<R>());
        f(entry.as_ref().and_then(|e| e.downcast_ref::<RequestSlot<R>>()))
    }

    fn subscribers<N: Notification>(&self) -> Arc<Subscribers<N>> {
        let shared = Arc::clone(
            self.inner
                .subscribers
                .entry(TypeId::of::<N>())
                .or_insert_with(|| Arc::new(Subscribers::<N>::new()))
                .value(),
        );
        // Keyed by N's TypeId, so the downcast always succeeds.
        shared
            .downcast::<Subscribers<N>>()
            .unwrap_or_else(|_| Arc::new(Subscribers::new()))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stages", &self.inner.stages)
            .field("cached_senders", &self.inner.senders.len())
            .finish()
    }
}

/// Configures the global stage list of a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherBuilder {
    stages: Vec<Stage>,
}

impl DispatcherBuilder {
    /// Starts from [`Stage::defaults`].
    pub fn new() -> Self {
        Self {
            stages: Stage::defaults(),
        }
    }

    /// Removes every stage, leaving bare handlers.
    pub fn without_stages(mut self) -> Self {
        self.stages.clear();
        self
    }

    /// Replaces the stage list.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages = stages.into_iter().collect();
        self
    }

    /// Appends a stage inside the ones already listed.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(Inner {
                stages: self.stages,
                requests: DashMap::new(),
                subscribers: DashMap::new(),
                senders: DashMap::new(),
            }),
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    impl Request for Ping {
        type Response = &'static str;
    }

    struct Pong;

    #[async_trait]
    impl RequestHandler<Ping> for Pong {
        async fn handle(&self, _: Ping) -> Result<&'static str, DispatchError> {
            Ok("pong")
        }
    }

    #[tokio::test]
    async fn test_send_without_handler_returns_no_handler() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.send(Ping).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoHandler { .. }));
        assert_eq!(dispatcher.inner.senders.len(), 0);
    }

    #[tokio::test]
    async fn test_register_after_failed_send_succeeds() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.send(Ping).await.is_err());

        dispatcher.register_handler::<Ping, _>(Pong).unwrap();
        assert_eq!(dispatcher.send(Ping).await.unwrap(), "pong");
    }

    #[test]
    fn test_register_handler_twice_returns_already_registered() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler::<Ping, _>(Pong).unwrap();
        let err = dispatcher.register_handler::<Ping, _>(Pong).unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_sender_depth_counts_default_stages() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler::<Ping, _>(Pong).unwrap();
        assert_eq!(dispatcher.sender::<Ping>().unwrap().depth(), 4);
    }

    #[test]
    fn test_builder_without_stages_has_bare_chain() {
        let dispatcher = Dispatcher::builder().without_stages().build();
        dispatcher.register_handler::<Ping, _>(Pong).unwrap();
        assert!(dispatcher.stages().is_empty());
        assert_eq!(dispatcher.sender::<Ping>().unwrap().depth(), 0);
    }

    #[test]
    fn test_clones_share_registrations() {
        let dispatcher = Dispatcher::new();
        let clone = dispatcher.clone();
        dispatcher.register_handler::<Ping, _>(Pong).unwrap();
        let a = dispatcher.sender::<Ping>().unwrap();
        let b = clone.sender::<Ping>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
