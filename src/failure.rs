//! Reporting of isolated handler failures.
//!
//! A failing handler never reaches the publisher. The dispatcher wraps the
//! cause in a [`HandlerFailure`] and hands it to the bus's [`FailureSink`].

use std::{panic::AssertUnwindSafe, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, trace, warn};

use crate::{event::EventKind, handler::HandlerError, registry::SubscriptionId};

/// Default capacity of a [`FailureChannel`].
pub const DEFAULT_FAILURE_CHANNEL_CAPACITY: usize = 256;

/// One handler invocation that did not complete: (kind, handler identity, error).
#[derive(Error, Debug, Clone)]
#[error("handler '{handler}' ({subscription}) failed on {kind}: {error}")]
pub struct HandlerFailure {
    pub kind: EventKind,
    pub subscription: SubscriptionId,
    pub handler: Arc<str>,
    pub error: HandlerError,
    pub occurred_at: DateTime<Utc>,
}

impl HandlerFailure {
    pub fn new(
        kind: EventKind,
        subscription: SubscriptionId,
        handler: Arc<str>,
        error: HandlerError,
    ) -> Self {
        Self {
            kind,
            subscription,
            handler,
            error,
            occurred_at: Utc::now(),
        }
    }
}

/// Destination for isolated handler failures.
#[cfg_attr(test, mockall::automock)]
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: &HandlerFailure);
}

impl<F> FailureSink for F
where
    F: Fn(&HandlerFailure) + Send + Sync,
{
    fn report(&self, failure: &HandlerFailure) {
        self(failure)
    }
}

/// Default sink: logs each failure and moves on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl FailureSink for LogSink {
    fn report(&self, failure: &HandlerFailure) {
        error!(
            kind = %failure.kind,
            subscription = %failure.subscription,
            handler = %failure.handler,
            error = %failure.error,
            "Event handler failed"
        );
    }
}

/// Error-collection channel. Every reported failure is broadcast to all
/// [`FailureReceiver`]s obtained from [`FailureChannel::subscribe`].
#[derive(Debug, Clone)]
pub struct FailureChannel {
    sender: broadcast::Sender<HandlerFailure>,
}

impl FailureChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> FailureReceiver {
        FailureReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FailureChannel {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_CHANNEL_CAPACITY)
    }
}

impl FailureSink for FailureChannel {
    fn report(&self, failure: &HandlerFailure) {
        if self.sender.send(failure.clone()).is_err() {
            warn!(
                kind = %failure.kind,
                handler = %failure.handler,
                error = %failure.error,
                "Handler failure dropped: no failure receivers"
            );
        }
    }
}

pub struct FailureReceiver {
    receiver: broadcast::Receiver<HandlerFailure>,
}

impl FailureReceiver {
    /// Next failure, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<HandlerFailure> {
        loop {
            match self.receiver.recv().await {
                Ok(failure) => return Some(failure),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Failure receiver lagged, reports dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<HandlerFailure> {
        loop {
            match self.receiver.try_recv() {
                Ok(failure) => return Some(failure),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Failure receiver lagged, reports dropped");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

/// Hands `failure` to `sink`, containing a panicking sink.
pub(crate) fn report(sink: &dyn FailureSink, failure: &HandlerFailure) {
    trace!(kind = %failure.kind, handler = %failure.handler, "Reporting handler failure");
    if std::panic::catch_unwind(AssertUnwindSafe(|| sink.report(failure))).is_err() {
        error!(
            kind = %failure.kind,
            handler = %failure.handler,
            error = %failure.error,
            "Failure sink panicked while reporting a handler failure"
        );
    }
}
