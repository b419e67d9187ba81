//! Error taxonomy shared by every bus operation.

use crate::signals::SignalKey;

/// Result type for busline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session, method, or signal operations.
///
/// Every error is returned to the immediate caller; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Session not initialized")]
    NotInitialized,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Bus name '{name}' is already owned by another connection")]
    NameUnavailable { name: String },

    #[error("Remote call failed: {name}: {message}")]
    RemoteCall { name: String, message: String },

    #[error("Signal '{0}' is not listened")]
    NotListened(SignalKey),

    #[error("AddMatch '{rule}' failed: {message}")]
    MatchRule { rule: String, message: String },

    #[error("Export of '{interface}' at '{path}' failed: {message}")]
    Export {
        path: String,
        interface: String,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Delivery queue for '{0}' closed")]
    QueueClosed(SignalKey),
}

impl Error {
    /// D-Bus error name carried by a failed remote call, if any.
    pub fn remote_error_name(&self) -> Option<&str> {
        match self {
            Error::RemoteCall { name, .. } => Some(name),
            _ => None,
        }
    }
}
