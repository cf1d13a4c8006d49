//! Error types for the dispatch layer.

use std::error::Error as StdError;

/// Boxed business error raised by a handler.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while routing a message.
///
/// The variants split into two families. Configuration errors
/// (`NoHandler`, `AlreadyRegistered`, `Sealed`, `CacheMismatch`) mean the
/// dispatcher was wired up wrong and will keep failing the same way.
/// Everything else is a runtime outcome of one particular message.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered for this request type.
    #[error("no handler registered for {message}")]
    NoHandler { message: &'static str },

    /// A request type may only have one handler.
    #[error("a handler for {message} is already registered")]
    AlreadyRegistered { message: &'static str },

    /// The pipeline for this type was already built, so new stages,
    /// behaviors or processors would never run.
    #[error("pipeline for {message} is already built")]
    Sealed { message: &'static str },

    /// A pre-processor refused the request before it reached the handler.
    #[error("{request} rejected: {reason}")]
    Rejected {
        request: &'static str,
        reason: String,
    },

    /// The handler returned a business error.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    /// A notification handler panicked or its task was aborted.
    #[error("handler for {message} panicked")]
    HandlerPanicked { message: &'static str },

    /// One or more notification handlers failed. `source` is the first
    /// failure in subscription order.
    #[error("{failed} handler(s) for {message} failed")]
    Notification {
        message: &'static str,
        failed: usize,
        #[source]
        source: Box<DispatchError>,
    },

    /// The type-keyed cache held a value of the wrong type.
    #[error("cached pipeline for {message} has an unexpected type")]
    CacheMismatch { message: &'static str },
}

impl DispatchError {
    /// Wraps any error as a handler failure.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// Returns `true` for errors caused by how the dispatcher was wired,
    /// rather than by a particular message.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoHandler { .. }
                | Self::AlreadyRegistered { .. }
                | Self::Sealed { .. }
                | Self::CacheMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_wraps_and_exposes_source() {
        let err = DispatchError::handler("boom");
        assert_eq!(err.to_string(), "handler failed: boom");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_is_configuration_distinguishes_no_handler() {
        assert!(DispatchError::NoHandler { message: "Ping" }.is_configuration());
        assert!(!DispatchError::handler("x").is_configuration());
        assert!(
            !DispatchError::Rejected {
                request: "Ping",
                reason: "nope".into()
            }
            .is_configuration()
        );
    }

    #[test]
    fn test_notification_display_counts_failures() {
        let err = DispatchError::Notification {
            message: "Joined",
            failed: 2,
            source: Box::new(DispatchError::handler("first")),
        };
        assert_eq!(err.to_string(), "2 handler(s) for Joined failed");
    }
}
