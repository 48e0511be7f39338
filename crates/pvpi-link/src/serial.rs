//! Serial port transport.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use pvpi_protocol::LineCodec;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::transport::Transport;

/// Default UART device on the Raspberry Pi.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";

/// Default baud rate of the MCU UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default bound on one exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the serial transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port path, e.g. `/dev/ttyAMA0`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Maximum wait for one reply line.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}

/// Transport over a real serial port.
///
/// Replies are read one byte at a time so that nothing past the first line
/// terminator is ever consumed. After an I/O failure the port is dropped and
/// reopened once on the next exchange.
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    codec: LineCodec,
    /// Set when an I/O failure dropped the port; cleared by `close`.
    reopen_pending: bool,
}

impl SerialTransport {
    /// Open the configured port.
    pub fn open(config: SerialConfig) -> LinkResult<Self> {
        let port = open_port(&config)?;
        info!(
            "Opened serial port {} at {} baud",
            config.port, config.baud_rate
        );
        Ok(SerialTransport {
            config,
            port: Some(port),
            codec: LineCodec::new(),
            reopen_pending: false,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> LinkResult<&mut Box<dyn SerialPort>> {
        if self.port.is_none() && self.reopen_pending {
            self.reopen_pending = false;
            warn!("Reopening serial port {}", self.config.port);
            self.port = Some(open_port(&self.config)?);
        }
        self.port.as_mut().ok_or(LinkError::TransportClosed)
    }

    fn drop_port(&mut self) {
        self.port = None;
        self.reopen_pending = true;
    }

    fn read_line(&mut self, deadline: Instant) -> LinkResult<String> {
        self.codec.clear();
        let mut byte = [0u8; 1];
        loop {
            let Some(remaining) = time_left(deadline, Instant::now()) else {
                return Err(LinkError::TransportTimeout);
            };
            let port = self.port()?;
            // Each read may only wait for what is left of the exchange.
            if let Err(e) = port.set_timeout(remaining) {
                self.drop_port();
                return Err(LinkError::Io(e.into()));
            }
            match port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {
                    self.codec
                        .push(&byte)
                        .map_err(|e| LinkError::Framing(e.to_string()))?;
                    if let Some(line) = self.codec.decode_line() {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(LinkError::TransportTimeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.drop_port();
                    return Err(LinkError::Io(e));
                }
            }
        }
    }
}

/// Time remaining before `deadline`, or `None` once it has passed.
fn time_left(deadline: Instant, now: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(now);
    (!left.is_zero()).then_some(left)
}

fn open_port(config: &SerialConfig) -> LinkResult<Box<dyn SerialPort>> {
    serialport::new(&config.port, config.baud_rate)
        .timeout(config.timeout)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .open()
        .map_err(|source| LinkError::SerialOpen {
            port: config.port.clone(),
            source,
        })
}

impl Transport for SerialTransport {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        let frame = LineCodec::encode_command(command);
        let deadline = Instant::now() + self.config.timeout;

        let port = self.port()?;
        // A reply that arrived after an earlier timeout must not be taken
        // as the answer to this command.
        if let Err(e) = port.clear(ClearBuffer::Input) {
            debug!("Could not clear serial input buffer: {}", e);
        }
        let written = port.write_all(&frame).and_then(|_| port.flush());
        if let Err(e) = written {
            self.drop_port();
            return Err(LinkError::Io(e));
        }
        debug!("Written to serial: {}", command);

        let line = self.read_line(deadline)?;
        debug!("Received from serial: {}", line);
        Ok(line)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.config.port);
        }
        self.reopen_pending = false;
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.port, "/dev/ttyAMA0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_read_timeout_never_exceeds_deadline() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(50);

        assert_eq!(time_left(deadline, now), Some(Duration::from_millis(50)));
        let late = now + Duration::from_millis(49);
        assert_eq!(time_left(deadline, late), Some(Duration::from_millis(1)));
        assert_eq!(time_left(deadline, deadline), None);
        assert_eq!(time_left(deadline, deadline + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig {
            port: "/dev/pvpi-does-not-exist".to_string(),
            ..Default::default()
        };
        let err = SerialTransport::open(config).err().unwrap();
        assert!(matches!(err, LinkError::SerialOpen { .. }));
    }
}
