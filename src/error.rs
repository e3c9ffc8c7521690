//! Client error taxonomy.
//!
//! [`LinkError`] is the single error type surfaced by the connector, the
//! link, and every subscription manager. Registry contract violations are
//! local programming errors; connection-level variants are recovered by the
//! reconnect loop and a full resync.

use crate::domain::Selector;

/// Convenience alias used throughout the crate.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Error enum for every fallible operation in the crate.
///
/// # Error Code Ranges
///
/// | Range     | Category                | Retried by reconnect |
/// |-----------|-------------------------|----------------------|
/// | 1000–1999 | Local contract / usage  | never                |
/// | 2000–2999 | Connection state        | yes (except `Closed`)|
/// | 3000–3999 | Remote / transport      | transport only       |
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Selector is malformed or not allowed for the entity class.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// `unregister` was called for a selector with no registered handlers.
    #[error("no handlers for {class} {selector} exist")]
    NoHandlers {
        /// Entity class name (e.g. `"instance"`).
        class: &'static str,
        /// Selector the caller tried to unregister from.
        selector: Selector,
    },

    /// `unregister` was called with a handler that is not registered.
    #[error("given handler is not registered for {class} {selector}")]
    HandlerNotFound {
        /// Entity class name (e.g. `"instance"`).
        class: &'static str,
        /// Selector the caller tried to unregister from.
        selector: Selector,
    },

    /// A handler for this inbound message kind is already registered.
    #[error("handler for message kind {0} already registered")]
    DuplicateHandler(String),

    /// A message was sent while the connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped before a response arrived.
    #[error("session lost")]
    SessionLost,

    /// The connector was closed and cannot be reused.
    #[error("connector is closed")]
    Closed,

    /// The access token is missing or was rejected by the server.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Lower-level connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered a request with an explicit error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// The server sent a frame that does not follow the wire format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LinkError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidSelector(_) => 1001,
            Self::NoHandlers { .. } => 1002,
            Self::HandlerNotFound { .. } => 1003,
            Self::DuplicateHandler(_) => 1004,
            Self::NotConnected => 2001,
            Self::SessionLost => 2002,
            Self::Closed => 2003,
            Self::Authentication(_) => 3001,
            Self::Transport(_) => 3002,
            Self::Remote(_) => 3003,
            Self::Protocol(_) => 3004,
            Self::Serialization(_) => 3005,
        }
    }

    /// Returns `true` if the reconnect loop may resolve the condition.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::SessionLost | Self::Transport(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
