//! Async dispatch worker pool.
//!
//! A single feeder task drains the command queue in order. For each
//! invocation it takes a permit from a semaphore sized to `workers`, hands the
//! handler to Tokio's blocking pool and waits until the handler has actually
//! started before moving on. Start order therefore matches queue order while up
//! to `workers` handlers run at the same time.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::{
    config::MAX_WORKERS,
    event::EventKind,
    failure::{self, FailureSink, HandlerFailure},
    handler::HandlerError,
    registry::SubscriptionId,
    BusError, BusResult,
};

pub(crate) struct Invocation {
    pub(crate) kind: EventKind,
    pub(crate) subscription: SubscriptionId,
    pub(crate) handler: Arc<str>,
    pub(crate) run: Box<dyn FnOnce() -> Result<(), HandlerError> + Send + 'static>,
}

enum Command {
    Invoke(Vec<Invocation>),
    Flush(oneshot::Sender<()>),
}

pub(crate) struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns the feeder on the current Tokio runtime.
    pub(crate) fn start(
        workers: usize,
        timeout: Option<Duration>,
        sink: Arc<dyn FailureSink>,
    ) -> BusResult<Self> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(BusError::invalid_config(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, workers
            )));
        }
        let runtime = Handle::try_current().map_err(|e| BusError::RuntimeUnavailable {
            message: e.to_string(),
        })?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let feeder = runtime.spawn(feed(receiver, workers, timeout, sink));
        debug!(workers, ?timeout, "Async dispatch worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            feeder: Mutex::new(Some(feeder)),
        })
    }

    pub(crate) fn submit(&self, batch: Vec<Invocation>) -> BusResult<()> {
        self.send(Command::Invoke(batch))
    }

    /// Resolves once everything submitted before this call has finished.
    pub(crate) async fn flush(&self) -> BusResult<()> {
        let (done, finished) = oneshot::channel();
        self.send(Command::Flush(done))?;
        finished.await.map_err(|_| BusError::Closed)
    }

    /// Stops accepting work and waits for queued invocations to complete.
    pub(crate) async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let feeder = self.feeder.lock().take();
        if let Some(feeder) = feeder {
            if let Err(e) = feeder.await {
                warn!(error = %e, "Async dispatch feeder terminated abnormally");
            }
        }
    }

    fn send(&self, command: Command) -> BusResult<()> {
        let sender = self.sender.lock();
        sender
            .as_ref()
            .ok_or(BusError::Closed)?
            .send(command)
            .map_err(|_| BusError::Closed)
    }
}

async fn feed(
    mut commands: mpsc::UnboundedReceiver<Command>,
    workers: usize,
    timeout: Option<Duration>,
    sink: Arc<dyn FailureSink>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    while let Some(command) = commands.recv().await {
        match command {
            Command::Invoke(batch) => {
                for invocation in batch {
                    start(invocation, &permits, timeout, &sink).await;
                }
            }
            Command::Flush(done) => {
                wait_idle(&permits, workers).await;
                let _ = done.send(());
            }
        }
    }
    wait_idle(&permits, workers).await;
    debug!("Async dispatch worker pool drained");
}

/// All permits free means no invocation is in flight.
async fn wait_idle(permits: &Semaphore, workers: usize) {
    let count = u32::try_from(workers).unwrap_or(u32::MAX);
    if let Ok(all) = permits.acquire_many(count).await {
        drop(all);
    }
}

async fn start(
    invocation: Invocation,
    permits: &Arc<Semaphore>,
    timeout: Option<Duration>,
    sink: &Arc<dyn FailureSink>,
) {
    let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
        return;
    };
    let Invocation {
        kind,
        subscription,
        handler,
        run,
    } = invocation;
    let (started, has_started) = oneshot::channel();
    let sink = Arc::clone(sink);

    tokio::spawn(async move {
        let _permit = permit;
        let task = tokio::task::spawn_blocking(move || {
            let _ = started.send(());
            run()
        });
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => Ok(Err(HandlerError::TimedOut(limit))),
            },
            None => task.await,
        };
        let result = joined.unwrap_or_else(|e| Err(HandlerError::Panicked(e.to_string())));
        match result {
            Ok(()) => trace!(kind = %kind, handler = %handler, "Async handler completed"),
            Err(error) => failure::report(
                sink.as_ref(),
                &HandlerFailure::new(kind, subscription, handler, error),
            ),
        }
    });

    // The next invocation may only start after this one has.
    let _ = has_started.await;
}
