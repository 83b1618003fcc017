use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pretty_assertions::assert_eq;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use typebus::{
    BusConfig, BusError, DispatchMode, Event, EventBus, FailureChannel, HandlerError,
    PublishOutcome, SubscriptionHandle,
};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[derive(Debug, Clone)]
struct Job {
    id: u32,
}
impl Event for Job {}

#[tokio::test]
async fn test_start_order_with_single_worker() {
    let bus = EventBus::builder()
        .dispatch_mode(DispatchMode::Async)
        .workers(1)
        .build()
        .unwrap();
    let started = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a", "b"] {
        let started = Arc::clone(&started);
        bus.subscribe(move |job: &Job| {
            started.lock().unwrap().push(format!("{}{}", tag, job.id));
            Ok(())
        });
    }

    for id in 0..3 {
        let outcome = bus.publish(Job { id }).unwrap();
        assert_eq!(outcome, PublishOutcome::Scheduled { handlers: 2 });
    }
    bus.flush().await.unwrap();

    assert_eq!(
        *started.lock().unwrap(),
        vec!["a0", "b0", "a1", "b1", "a2", "b2"]
    );
    bus.shutdown().await;
}

#[derive(Debug, Clone)]
struct JobFinished {
    id: u32,
}
impl Event for JobFinished {}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_reenters_bus_from_worker() {
    let bus = EventBus::with_config(BusConfig::asynchronous(2)).unwrap();
    let finished = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&finished);
    bus.subscribe(move |event: &JobFinished| {
        seen.lock().unwrap().push(event.id);
        Ok(())
    });

    let weak = bus.downgrade();
    let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
    let own = Arc::clone(&slot);
    let replacement_calls = Arc::new(Mutex::new(0));
    let replacement = Arc::clone(&replacement_calls);
    let first = bus.subscribe(move |job: &Job| {
        let Some(bus) = weak.upgrade() else {
            return Ok(());
        };
        bus.publish(JobFinished { id: job.id })?;
        let calls = Arc::clone(&replacement);
        bus.subscribe(move |_: &Job| {
            *calls.lock().unwrap() += 1;
            Ok(())
        });
        if let Some(handle) = own.lock().unwrap().take() {
            bus.unsubscribe(&handle);
        }
        Ok(())
    });
    *slot.lock().unwrap() = Some(first.clone());

    bus.publish(Job { id: 1 }).unwrap();
    // the first flush covers the handler, the second the event it published
    bus.flush().await.unwrap();
    bus.flush().await.unwrap();

    assert_eq!(*finished.lock().unwrap(), vec![1]);
    assert!(!bus.registry().contains(&first));
    assert_eq!(bus.subscriber_count::<Job>(), 1);
    assert_eq!(*replacement_calls.lock().unwrap(), 0);

    bus.publish(Job { id: 2 }).unwrap();
    bus.flush().await.unwrap();
    assert_eq!(*replacement_calls.lock().unwrap(), 1);
    assert_eq!(*finished.lock().unwrap(), vec![1]);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_publish_returns_before_handlers_finish() {
    let bus = EventBus::with_config(BusConfig::asynchronous(2)).unwrap();
    let (release, gate) = std::sync::mpsc::channel::<()>();
    let gate = Arc::new(Mutex::new(gate));
    let done = Arc::new(Mutex::new(false));

    let finished = Arc::clone(&done);
    bus.subscribe(move |_: &Job| {
        gate.lock().unwrap().recv()?;
        *finished.lock().unwrap() = true;
        Ok(())
    });

    bus.publish(Job { id: 1 }).unwrap();
    assert!(!*done.lock().unwrap());

    release.send(()).unwrap();
    bus.flush().await.unwrap();
    assert!(*done.lock().unwrap());
    bus.shutdown().await;
}

#[tokio::test]
async fn test_async_failures_reach_channel() {
    let failures = FailureChannel::new(16);
    let mut reports = failures.subscribe();
    let bus = EventBus::builder()
        .config(BusConfig::asynchronous(2))
        .handler_timeout(Duration::from_millis(30))
        .failure_sink(failures)
        .build()
        .unwrap();

    bus.subscribe_named("slow", |_: &Job| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    bus.subscribe_named("broken", |job: &Job| Err(format!("job {} rejected", job.id).into()));

    bus.publish(Job { id: 4 }).unwrap();
    bus.flush().await.unwrap();

    let mut errors = Vec::new();
    while errors.len() < 2 {
        let failure = reports.recv().await.unwrap();
        errors.push((failure.handler.to_string(), failure.error));
    }
    errors.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        errors,
        vec![
            (
                "broken".to_string(),
                HandlerError::Failed("job 4 rejected".to_string())
            ),
            (
                "slow".to_string(),
                HandlerError::TimedOut(Duration::from_millis(30))
            ),
        ]
    );
    bus.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_and_closes() {
    let bus = EventBus::with_config(BusConfig::asynchronous(1)).unwrap();
    let count = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&count);
    bus.subscribe(move |_: &Job| {
        std::thread::sleep(Duration::from_millis(2));
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    for id in 0..10 {
        bus.publish(Job { id }).unwrap();
    }
    bus.shutdown().await;

    assert_eq!(*count.lock().unwrap(), 10);
    assert!(bus.is_closed());
    assert!(matches!(bus.publish(Job { id: 99 }), Err(BusError::Closed)));
    assert!(matches!(bus.flush().await, Err(BusError::Closed)));
    bus.shutdown().await;
}

#[tokio::test]
async fn test_config_from_json() {
    let config = BusConfig::from_str(r#"{"dispatch_mode": "async", "workers": 3}"#).unwrap();
    let bus = EventBus::with_config(config).unwrap();
    assert_eq!(bus.dispatch_mode(), DispatchMode::Async);
    assert_eq!(bus.config().workers, 3);
    bus.shutdown().await;
}
