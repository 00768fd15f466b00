// MIT License - Copyright (c) 2021 TJForc
// Error taxonomy for the DMP session, queue and listener

use crate::transport::registry::PanelIdentity;

/// All errors that can occur in the dmp-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum DmpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial failure or misuse of a connection that is not usable.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Panel already has an active session: {0}")]
    AlreadyConnected(PanelIdentity),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A command could not be built from the supplied parameters.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },

    /// The panel answered a control command with a NAK.
    #[error("Command rejected by panel: {command}")]
    Rejected { command: String },

    #[error("Command queue is shut down")]
    QueueShutdown,

    #[error("Listener error: {0}")]
    Listener(String),
}

impl DmpError {
    /// Whether this error means the underlying connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DmpError::Io(_)
                | DmpError::Connection(_)
                | DmpError::NotConnected
                | DmpError::AlreadyConnected(_)
        )
    }

    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DmpError::Io(_) | DmpError::Connection(_) | DmpError::NotConnected | DmpError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DmpError>;
