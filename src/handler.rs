use std::{fmt, marker::PhantomData, time::Duration};

use thiserror::Error;

use crate::event::{kind::short_type_name, Event};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Completion signal of a handler. Any error type converts with `?`.
pub type HandlerResult = Result<(), BoxError>;

/// A callback bound to exactly one event type.
///
/// Implement this for stateful subscribers; plain closures go through
/// [`FnHandler`] via `EventBus::subscribe`.
pub trait Handler<E: Event>: Send + Sync + 'static {
    fn handle(&self, event: &E) -> HandlerResult;

    /// Identity reported alongside failures.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }
}

/// Adapts a closure into a [`Handler`].
pub struct FnHandler<E, F> {
    name: String,
    f: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnHandler<E, F>
where
    E: Event,
    F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self::named(format!("fn({})", E::name()), f)
    }

    pub fn named(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> Handler<E> for FnHandler<E, F>
where
    E: Event,
    F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, event: &E) -> HandlerResult {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<E, F> fmt::Debug for FnHandler<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

/// Why an isolated handler invocation did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler returned an error: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

impl HandlerError {
    pub(crate) fn from_boxed(error: BoxError) -> Self {
        HandlerError::Failed(error.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerError::Panicked(message)
    }
}
