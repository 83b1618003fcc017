//! # Event Bus
//!
//! [`EventBus`] ties the [`Registry`] and the dispatcher together behind the
//! public publish/subscribe API. The bus is a cheap handle: clones share the
//! same registry, dispatcher and failure sink, so pass clones to components
//! instead of reaching for a global instance.
//!
//! **WARNING:** a handler that owns a clone of the bus it is subscribed to
//! forms an `Arc` cycle that keeps the bus alive until the subscription is
//! removed or the bus is shut down. Hold a [`WeakEventBus`] in that case.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use tracing::{debug, info, trace};

use crate::{
    config::{BusConfig, DispatchMode},
    dispatcher::{Dispatcher, PublishOutcome, WorkerPool},
    event::{Event, EventKind},
    failure::{FailureSink, LogSink},
    handler::{FnHandler, Handler, HandlerResult},
    registry::{Registry, SubscriptionHandle},
    BusError, BusResult,
};

struct Inner {
    registry: Registry,
    dispatcher: Dispatcher,
    config: BusConfig,
    closed: AtomicBool,
}

/// In-process typed publish/subscribe bus.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use typebus::{Event, EventBus};
///
/// struct UserLoggedIn {
///     user: String,
/// }
/// impl Event for UserLoggedIn {}
///
/// let bus = EventBus::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// bus.subscribe(move |event: &UserLoggedIn| {
///     sink.lock().unwrap().push(event.user.clone());
///     Ok(())
/// });
///
/// bus.publish(UserLoggedIn { user: "Alice".to_string() }).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec!["Alice".to_string()]);
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Synchronous bus that logs handler failures.
    pub fn new() -> Self {
        Self::from_parts(
            BusConfig::default(),
            Dispatcher::sync(Arc::new(LogSink)),
        )
    }

    /// Bus built from `config` with the default logging failure sink.
    ///
    /// Async mode must be called from within a Tokio runtime.
    pub fn with_config(config: BusConfig) -> BusResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    fn from_parts(config: BusConfig, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                dispatcher,
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes a closure to events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionHandle
    where
        E: Event,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(FnHandler::new(handler))
    }

    /// Like [`EventBus::subscribe`], with a name used in failure reports.
    pub fn subscribe_named<E, F>(&self, name: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        E: Event,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(FnHandler::named(name, handler))
    }

    pub fn subscribe_handler<E, H>(&self, handler: H) -> SubscriptionHandle
    where
        E: Event,
        H: Handler<E>,
    {
        self.subscribe_shared::<E>(Arc::new(handler))
    }

    /// Subscribes an already shared handler. Subscribing the same `Arc` twice
    /// creates two independent subscriptions.
    ///
    /// A closed bus hands out a handle that is never registered.
    pub fn subscribe_shared<E: Event>(&self, handler: Arc<dyn Handler<E>>) -> SubscriptionHandle {
        if self.is_closed() {
            let handle = Registry::detached_handle::<E>(handler.as_ref());
            debug!(kind = %handle.kind(), handler = %handle.handler_name(), "Subscribe on closed bus ignored");
            return handle;
        }
        let handle = self.inner.registry.subscribe::<E>(handler);
        // shutdown may have cleared the registry between the check and the insert
        if self.is_closed() && self.inner.registry.unsubscribe(&handle) {
            debug!(kind = %handle.kind(), handler = %handle.handler_name(), "Subscription raced shutdown, removed");
        }
        handle
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.registry.unsubscribe(handle)
    }

    /// Publishes `event` to every handler currently subscribed to its type.
    ///
    /// Handler failures never surface here. Errors are limited to an event
    /// rejected by [`Event::validate`] and a bus that has been shut down.
    pub fn publish<E: Event>(&self, event: E) -> BusResult<PublishOutcome> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        if let Err(reason) = event.validate() {
            return Err(BusError::InvalidEvent {
                kind: EventKind::of::<E>(),
                reason,
            });
        }
        trace!(kind = %EventKind::of::<E>(), "Publishing event");
        self.inner.dispatcher.dispatch(&self.inner.registry, event)
    }

    /// Waits until every handler scheduled so far has finished. No-op in sync mode.
    pub async fn flush(&self) -> BusResult<()> {
        self.inner.dispatcher.flush().await
    }

    /// Tears the bus down: rejects further publishes, drains scheduled
    /// handlers and drops every subscription. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(mode = %self.dispatch_mode(), "Shutting down event bus");
        self.inner.dispatcher.shutdown().await;
        let dropped = self.inner.registry.clear();
        debug!(dropped, "Event bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.inner.registry.subscriber_count(&EventKind::of::<E>())
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.inner.dispatcher.mode()
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Non-owning reference to an [`EventBus`].
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<Inner>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl std::fmt::Debug for WeakEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEventBus")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Builder for [`EventBus`].
pub struct EventBusBuilder {
    config: BusConfig,
    sink: Option<Arc<dyn FailureSink>>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            sink: None,
        }
    }

    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn handler_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    pub fn failure_sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn shared_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> BusResult<EventBus> {
        self.config.validate()?;
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let dispatcher = match self.config.dispatch_mode {
            DispatchMode::Sync => Dispatcher::sync(sink),
            DispatchMode::Async => {
                let pool = WorkerPool::start(
                    self.config.workers,
                    self.config.handler_timeout,
                    Arc::clone(&sink),
                )?;
                Dispatcher::with_pool(sink, pool)
            }
        };
        debug!(mode = %self.config.dispatch_mode, workers = self.config.workers, "Event bus created");
        Ok(EventBus::from_parts(self.config, dispatcher))
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
