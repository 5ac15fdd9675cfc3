//! Error types for presence-core operations.
//!
//! Transport, protocol, and transmit failures are all recoverable: the session
//! loop reports them to its diagnostics sink and retries. Only configuration
//! errors reach a caller, and only at construction.

use std::path::PathBuf;

use presence_protocol::FrameError;

/// All errors that can occur in presence-core operations.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    // ─────────────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No IPC endpoint available: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote closed the connection: {code}: {message}")]
    RemoteClosed { code: i64, message: String },

    #[error("Transmit failed: {source}")]
    Transmit {
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Required configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Webhook delivery failed: {0}")]
    Webhook(String),
}

impl PresenceError {
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PresenceError::Json {
            context: context.into(),
            source,
        }
    }

    /// Errors the loop answers by dropping the channel and reconnecting.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            PresenceError::TransportUnavailable { .. }
                | PresenceError::Protocol(_)
                | PresenceError::RemoteClosed { .. }
                | PresenceError::Transmit { .. }
        )
    }
}

impl From<FrameError> for PresenceError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(source) => PresenceError::Transmit { source },
            other => PresenceError::Protocol(other.to_string()),
        }
    }
}

/// Convenience type alias for Results using PresenceError.
pub type Result<T> = std::result::Result<T, PresenceError>;

impl From<PresenceError> for String {
    fn from(err: PresenceError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_io_errors_become_transmit_failures() {
        let err: PresenceError =
            FrameError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).into();
        assert!(matches!(err, PresenceError::Transmit { .. }));
        assert!(err.is_connection_loss());
    }

    #[test]
    fn malformed_frames_become_protocol_errors() {
        let err: PresenceError = FrameError::UnknownOpcode(7).into();
        assert!(matches!(err, PresenceError::Protocol(_)));
    }

    #[test]
    fn configuration_errors_are_not_connection_loss() {
        assert!(!PresenceError::ConfigurationMissing("client_id").is_connection_loss());
    }
}
