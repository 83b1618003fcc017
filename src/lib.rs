//! # typebus
//!
//! An in-process, typed publish/subscribe event bus.
//!
//! Components publish plain Rust values; every handler subscribed to the
//! value's type receives it. Publishers never learn who is listening, and a
//! handler that fails or panics is reported to a [`FailureSink`] without
//! disturbing the publisher or the other handlers.
//!
//! ```rust
//! use typebus::{Event, EventBus, PublishOutcome};
//!
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//! impl Event for OrderPlaced {}
//!
//! let bus = EventBus::new();
//! let handle = bus.subscribe(|order: &OrderPlaced| {
//!     assert_eq!(order.order_id, 7);
//!     Ok(())
//! });
//!
//! let outcome = bus.publish(OrderPlaced { order_id: 7 }).unwrap();
//! assert_eq!(outcome, PublishOutcome::Delivered { attempted: 1, failed: 0 });
//!
//! bus.unsubscribe(&handle);
//! assert_eq!(bus.publish(OrderPlaced { order_id: 8 }).unwrap(), PublishOutcome::NoSubscribers);
//! ```

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod failure;
pub mod handler;
pub mod registry;

// Re-exports
pub use bus::{EventBus, EventBusBuilder, WeakEventBus};
pub use config::{BusConfig, DispatchMode, MAX_WORKERS};
pub use dispatcher::PublishOutcome;
pub use error::{BusError, BusResult};
pub use event::{Event, EventExt, EventKind};
pub use failure::{
    FailureChannel, FailureReceiver, FailureSink, HandlerFailure, LogSink,
    DEFAULT_FAILURE_CHANNEL_CAPACITY,
};
pub use handler::{BoxError, FnHandler, Handler, HandlerError, HandlerResult};
pub use registry::{HandlerSnapshot, Registry, Subscription, SubscriptionHandle, SubscriptionId};
