//! Error types for the session layer.

use trailhead_dispatch::DispatchError;
use trailhead_protocol::PlayerId;
use trailhead_transport::TransportError;

/// Errors that can occur while managing players.
///
/// Admission refusals are not errors: a refused join is a normal outcome,
/// reported to the client as a `Kicked` packet (see
/// [`Denial`](crate::Denial)).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No joined player has this ID.
    #[error("no player with id {0}")]
    UnknownPlayer(PlayerId),

    /// The profile store could not produce a profile.
    #[error("profile lookup failed: {0}")]
    Profile(String),

    /// Writing to a player's connection failed.
    #[error(transparent)]
    Send(#[from] TransportError),

    /// A follow-up publish failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Dispatch(inner) => inner,
            other => DispatchError::handler(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_player_display() {
        let err = SessionError::UnknownPlayer(PlayerId(4));
        assert_eq!(err.to_string(), "no player with id P-4");
    }

    #[test]
    fn test_into_dispatch_error_wraps_as_handler() {
        let err: DispatchError = SessionError::Profile("db down".into()).into();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert!(err.to_string().contains("db down"));
    }

    #[test]
    fn test_into_dispatch_error_unwraps_dispatch() {
        let inner = DispatchError::NoHandler { message: "X" };
        let err: DispatchError = SessionError::Dispatch(inner).into();
        assert!(matches!(err, DispatchError::NoHandler { .. }));
    }
}
