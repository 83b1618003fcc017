//! # Dispatcher
//!
//! Delivers one published event to every handler in the registry snapshot for
//! its kind. Each invocation runs behind an isolation boundary: a returned
//! error or a panic becomes a [`HandlerFailure`] for the failure sink, and
//! delivery continues with the next handler.
//!
//! ## Modes
//!
//! - **Sync**: handlers run on the publisher's thread in subscription order;
//!   `publish` returns after the last one.
//! - **Async**: the whole snapshot is queued to the worker pool as one
//!   batch; `publish` returns once it is queued. Start order follows the queue,
//!   completion order does not.

mod worker;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::trace;

use crate::{
    config::DispatchMode,
    event::Event,
    failure::{self, FailureSink, HandlerFailure},
    handler::{Handler, HandlerError},
    registry::{HandlerSnapshot, Registry},
    BusResult,
};

pub(crate) use worker::{Invocation, WorkerPool};

/// What a single `publish` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nobody was subscribed to the event's kind.
    NoSubscribers,
    /// Sync mode: every handler in the snapshot was attempted.
    Delivered { attempted: usize, failed: usize },
    /// Async mode: invocations were queued on the worker pool.
    Scheduled { handlers: usize },
}

impl PublishOutcome {
    /// Number of handlers the event was handed to.
    pub fn handlers(&self) -> usize {
        match self {
            PublishOutcome::NoSubscribers => 0,
            PublishOutcome::Delivered { attempted, .. } => *attempted,
            PublishOutcome::Scheduled { handlers } => *handlers,
        }
    }
}

pub(crate) struct Dispatcher {
    sink: Arc<dyn FailureSink>,
    pool: Option<WorkerPool>,
}

impl Dispatcher {
    pub(crate) fn sync(sink: Arc<dyn FailureSink>) -> Self {
        Self { sink, pool: None }
    }

    pub(crate) fn with_pool(sink: Arc<dyn FailureSink>, pool: WorkerPool) -> Self {
        Self {
            sink,
            pool: Some(pool),
        }
    }

    pub(crate) fn mode(&self) -> DispatchMode {
        match self.pool {
            Some(_) => DispatchMode::Async,
            None => DispatchMode::Sync,
        }
    }

    pub(crate) fn dispatch<E: Event>(
        &self,
        registry: &Registry,
        event: E,
    ) -> BusResult<PublishOutcome> {
        let handlers = registry.lookup::<E>();
        if handlers.is_empty() {
            trace!(kind = %handlers.kind(), "No subscribers for event");
            return Ok(PublishOutcome::NoSubscribers);
        }

        trace!(kind = %handlers.kind(), handlers = handlers.len(), mode = %self.mode(), "Dispatching event");
        match &self.pool {
            None => Ok(self.deliver(&handlers, &event)),
            Some(pool) => Self::schedule(pool, &handlers, event),
        }
    }

    fn deliver<E: Event>(&self, handlers: &HandlerSnapshot<E>, event: &E) -> PublishOutcome {
        let mut failed = 0;
        for subscription in handlers {
            if let Err(error) = invoke(subscription.handler().as_ref(), event) {
                failed += 1;
                failure::report(
                    self.sink.as_ref(),
                    &HandlerFailure::new(
                        handlers.kind(),
                        subscription.id(),
                        Arc::clone(subscription.name()),
                        error,
                    ),
                );
            }
        }
        PublishOutcome::Delivered {
            attempted: handlers.len(),
            failed,
        }
    }

    fn schedule<E: Event>(
        pool: &WorkerPool,
        handlers: &HandlerSnapshot<E>,
        event: E,
    ) -> BusResult<PublishOutcome> {
        let event = Arc::new(event);
        let batch = handlers
            .iter()
            .map(|subscription| {
                let handler = Arc::clone(subscription.handler());
                let event = Arc::clone(&event);
                Invocation {
                    kind: handlers.kind(),
                    subscription: subscription.id(),
                    handler: Arc::clone(subscription.name()),
                    run: Box::new(move || invoke(handler.as_ref(), event.as_ref())),
                }
            })
            .collect::<Vec<_>>();
        let count = batch.len();
        pool.submit(batch)?;
        Ok(PublishOutcome::Scheduled { handlers: count })
    }

    pub(crate) async fn flush(&self) -> BusResult<()> {
        match &self.pool {
            Some(pool) => pool.flush().await,
            None => Ok(()),
        }
    }

    pub(crate) async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

/// Runs one handler behind the isolation boundary.
pub(crate) fn invoke<E: Event>(handler: &dyn Handler<E>, event: &E) -> Result<(), HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(HandlerError::from_boxed(error)),
        Err(payload) => Err(HandlerError::from_panic(payload)),
    }
}
