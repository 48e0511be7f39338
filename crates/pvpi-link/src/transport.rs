//! The exclusive device line.

use crate::error::LinkResult;

/// A half-duplex line to the MCU: write one command line, read one reply line.
///
/// Implementations are not reentrant. The broker (or, in single-consumer
/// deployments, the one client) is the only caller and never overlaps two
/// exchanges. No retry happens at this level; a failed exchange is returned
/// as-is.
pub trait Transport: Send + 'static {
    /// Write `command` plus the line terminator, then block for exactly one
    /// reply line.
    ///
    /// Fails with [`LinkError::TransportTimeout`](crate::LinkError::TransportTimeout)
    /// if no line arrives within the configured bound and with
    /// [`LinkError::TransportClosed`](crate::LinkError::TransportClosed) if the
    /// line is not open.
    fn exchange(&mut self, command: &str) -> LinkResult<String>;

    /// Release the line. Later exchanges fail with `TransportClosed`.
    fn close(&mut self);

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        (**self).exchange(command)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
