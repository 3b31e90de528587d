use crate::state::MessengerState;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MessengerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Cannot {action} while messenger is {state}")]
    InvalidState {
        state: MessengerState,
        action: &'static str,
    },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Too many consecutive send errors: {0}")]
    TooManySendErrors(u32),
}

/// Failures reported by, or about, a send or receive link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The link cannot take a transfer right now (no credit, still attaching).
    #[error("Link not ready: {0}")]
    NotReady(String),

    #[error("Link detached: {0}")]
    Detached(String),

    #[error("Link attach failed: {0}")]
    AttachFailed(String),

    #[error("Link attach timed out: {0}")]
    AttachTimeout(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}

pub type MessengerResult<T> = Result<T, MessengerError>;
