//! Error types for the PV PI protocol.

use thiserror::Error;

/// Errors that can occur when decoding replies from the MCU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The reply's leading tag is not the one the command expects.
    #[error("unexpected reply tag: expected {expected}, got {received:?}")]
    UnexpectedTag {
        /// Tag the command expects.
        expected: String,
        /// Tag actually received.
        received: String,
    },

    /// The reply has fewer fields than the command expects.
    #[error("reply {reply:?} is missing field {index}")]
    MissingField {
        /// The raw reply line.
        reply: String,
        /// Zero-based field index that was expected.
        index: usize,
    },

    /// A numeric field could not be parsed.
    #[error("invalid number {value:?} in reply {reply:?}")]
    InvalidNumber {
        /// The raw reply line.
        reply: String,
        /// The offending field.
        value: String,
    },

    /// A set command was not acknowledged with `OK`.
    #[error("{command} not acknowledged: {reply:?}")]
    NotAcknowledged {
        /// Command name.
        command: &'static str,
        /// The raw reply line.
        reply: String,
    },

    /// Charge state index outside the known table.
    #[error("unknown charge state {0}")]
    UnknownChargeState(u8),

    /// Date/time fields do not form a valid calendar date.
    #[error("invalid device date/time: {0}")]
    InvalidDateTime(String),

    /// Line too long for the codec buffer.
    #[error("buffer overflow: max {max} bytes, got {actual}")]
    BufferOverflow { max: usize, actual: usize },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
