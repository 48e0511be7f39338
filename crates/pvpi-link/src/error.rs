//! Error types for the link layer.

use std::time::Duration;

use thiserror::Error;

/// Errors raised below the protocol: the serial line, the broker relay, and
/// the broker channel framing.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No reply line arrived from the device within the exchange bound.
    #[error("device did not reply in time")]
    TransportTimeout,

    /// The serial connection is not open.
    #[error("serial connection is closed")]
    TransportClosed,

    /// Failed to open the serial port.
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        /// Port path.
        port: String,
        /// Underlying error.
        #[source]
        source: serialport::Error,
    },

    /// I/O error on the serial line or the broker socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker could not be reached or failed its liveness probe.
    #[error("broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// The broker did not answer a request in time.
    #[error("no response from broker within {0:?}")]
    NoResponse(Duration),

    /// The broker answered with an error sentinel.
    #[error("broker reported: {0}")]
    Relay(String),

    /// A broker channel frame could not be decoded.
    #[error("framing error: {0}")]
    Framing(String),

    /// The broker's serializing worker stopped unexpectedly.
    #[error("broker worker failed: {0}")]
    WorkerFailed(String),
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
