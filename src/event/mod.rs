//! # Typed Events
//!
//! Every value published on the bus is an [`Event`]. The Rust type of the value
//! is its kind: handlers subscribe to a type, and the registry keys its table by
//! the [`EventKind`] derived from that type.
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────┐     ┌──────────┐     ┌────────────┐     ┌──────────┐
//! │Publisher │────▶│ Registry │────▶│ Dispatcher │────▶│ Handlers │
//! └──────────┘     └────┬─────┘     └─────┬──────┘     └──────────┘
//!                       │                 │
//!                  ┌────▼────┐      ┌─────▼──────┐
//!                  │EventKind│      │FailureSink │
//!                  └─────────┘      └────────────┘
//! ```
//!
//! 1. A publisher hands an event to the bus
//! 2. The registry returns a snapshot of the handlers for the event's kind
//! 3. The dispatcher invokes each handler in subscription order, isolating failures
//!
//! ## Defining Events
//!
//! ```rust
//! use typebus::Event;
//!
//! #[derive(Debug, Clone)]
//! struct UserLoggedIn {
//!     user: String,
//! }
//!
//! impl Event for UserLoggedIn {
//!     fn validate(&self) -> Result<(), String> {
//!         if self.user.is_empty() {
//!             return Err("user must not be empty".to_string());
//!         }
//!         Ok(())
//!     }
//! }
//! ```

pub(crate) mod kind;

pub use kind::EventKind;

/// A value that can be published on the bus.
///
/// Events are treated as immutable: handlers receive a shared reference and
/// the bus never inspects the payload beyond [`Event::validate`].
pub trait Event: Send + Sync + 'static {
    /// Human readable name used in logs and failure reports.
    fn name() -> &'static str
    where
        Self: Sized,
    {
        kind::short_type_name::<Self>()
    }

    /// Rejects values that must never reach handlers.
    ///
    /// Called once per publish, before the handler lookup. An `Err` makes
    /// `publish` fail with [`crate::BusError::InvalidEvent`].
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Methods every [`Event`] gets for free.
///
/// Implemented for all events through a blanket impl, so the kind of a value
/// is always the kind the registry keys its handlers under.
pub trait EventExt: Event + Sized {
    fn kind(&self) -> EventKind {
        EventKind::of::<Self>()
    }
}

impl<E: Event> EventExt for E {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl Event for Ping {}

    struct Checked(i64);
    impl Event for Checked {
        fn name() -> &'static str {
            "checked"
        }

        fn validate(&self) -> Result<(), String> {
            if self.0 < 0 {
                return Err(format!("negative value {}", self.0));
            }
            Ok(())
        }
    }

    #[test]
    fn test_default_name_is_short_type_name() {
        assert_eq!(Ping::name(), "Ping");
        assert_eq!(Ping.kind().name(), "Ping");
    }

    #[test]
    fn test_value_kind_matches_type_kind() {
        assert_eq!(Ping.kind(), EventKind::of::<Ping>());
        assert_ne!(Ping.kind(), Checked(0).kind());
    }

    #[test]
    fn test_custom_name_and_validation() {
        assert_eq!(Checked::name(), "checked");
        assert_eq!(Checked(1).kind().name(), "checked");
        assert!(Checked(1).validate().is_ok());
        assert_eq!(
            Checked(-3).validate().unwrap_err(),
            "negative value -3".to_string()
        );
    }
}
