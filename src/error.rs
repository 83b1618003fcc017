use thiserror::Error;

use crate::event::EventKind;

/// Errors surfaced to callers of the bus.
///
/// Handler misbehaviour never shows up here: it is isolated at the dispatch
/// boundary and routed to the configured [`crate::FailureSink`].
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid event {kind}: {reason}")]
    InvalidEvent { kind: EventKind, reason: String },

    #[error("Event bus is closed")]
    Closed,

    #[error("Async dispatch requires a running Tokio runtime: {message}")]
    RuntimeUnavailable { message: String },

    #[error("Invalid bus configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to load bus configuration: {message}")]
    ConfigLoad { message: String },
}

pub type BusResult<T> = Result<T, BusError>;

impl BusError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        BusError::InvalidConfig {
            message: message.into(),
        }
    }
}
