//! Error types for the device client.

use pvpi_link::LinkError;
use pvpi_protocol::ProtocolError;
use thiserror::Error;

/// Errors returned by [`PvPiClient`](crate::PvPiClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The command could not be delivered or no reply came back.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A reply came back but did not mean what was expected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An argument was rejected before anything was sent.
    #[error("invalid {name}: {value} (allowed range {range})")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Rejected value, formatted.
        value: String,
        /// Accepted range, formatted.
        range: &'static str,
    },
}

impl ClientError {
    /// Whether the device could not be reached at all, as opposed to a bad
    /// reply or a bad argument.
    pub fn is_link(&self) -> bool {
        matches!(self, ClientError::Link(_))
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
