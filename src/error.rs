//! Error types for the mesh transport

use thiserror::Error;

/// Result type for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Error types for mesh transport operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A datagram (or the remainder of one) could not be interpreted.
    /// Reported per datagram by the receive loop, never fatal.
    #[error("Malformed datagram: {message}")]
    Malformed { message: String },

    /// The client has been stopped; expected termination path.
    #[error("Client shut down")]
    Shutdown,
}

impl MeshError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        MeshError::Config {
            message: message.into(),
        }
    }

    /// Create a malformed-datagram error
    pub fn malformed(message: impl Into<String>) -> Self {
        MeshError::Malformed {
            message: message.into(),
        }
    }

    /// Check whether this error must abort client startup or a whole loop.
    /// Malformed datagrams and shutdown are handled in place.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeshError::Io(_) | MeshError::Config { .. })
    }
}
