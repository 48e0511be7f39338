//! Client-side stub that reaches the device through the broker.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::broker::DEFAULT_BROKER_ADDR;
use crate::error::{LinkError, LinkResult};
use crate::frame::{self, Frame, FrameCodec, FrameKind};
use crate::transport::Transport;

/// Default bound on establishing the broker connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on waiting for one reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Identity announced when none is configured: `client_pid#<pid>`, with a
/// `-<n>` suffix for every further stub in the same process.
pub fn default_identity() -> String {
    let n = INSTANCES.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    if n == 0 {
        format!("client_pid#{}", pid)
    } else {
        format!("client_pid#{}-{}", pid, n)
    }
}

/// Settings for a [`RemoteClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Broker endpoint.
    pub addr: String,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    /// Identity to announce. `None` uses [`default_identity`].
    pub identity: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            addr: DEFAULT_BROKER_ADDR.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            identity: None,
        }
    }
}

/// A blocking request/reply stub connected to the broker.
///
/// One request is outstanding at a time. Every request carries a sequence
/// number; a reply to an earlier request that timed out on this side is
/// discarded when it finally arrives.
pub struct RemoteClient {
    stream: TcpStream,
    codec: FrameCodec,
    addr: String,
    identity: String,
    reply_timeout: Duration,
    next_seq: u16,
}

impl RemoteClient {
    /// Connect, announce the identity and probe the broker.
    ///
    /// Fails with [`LinkError::BrokerUnreachable`] if the broker cannot be
    /// reached or does not echo the zero-length probe in time.
    pub fn connect(config: RemoteConfig) -> LinkResult<Self> {
        let unreachable =
            |detail: String| LinkError::BrokerUnreachable(format!("{}: {}", config.addr, detail));

        let stream = connect_any(&config.addr, config.connect_timeout)
            .map_err(|e| unreachable(e.to_string()))?;
        stream.set_nodelay(true)?;

        let identity = config.identity.clone().unwrap_or_else(default_identity);
        let mut client = RemoteClient {
            stream,
            codec: FrameCodec::new(),
            addr: config.addr.clone(),
            identity,
            reply_timeout: config.reply_timeout,
            next_seq: 0,
        };

        client
            .write_frame(&Frame::identity(&client.identity))
            .map_err(|e| unreachable(e.to_string()))?;
        match client.send(&[]) {
            Ok(reply) if reply.is_empty() => {}
            Ok(_) => return Err(unreachable("probe echo was not empty".to_string())),
            Err(e) => return Err(unreachable(e.to_string())),
        }

        info!("Connected to broker {} as {}", client.addr, client.identity);
        Ok(client)
    }

    /// The announced identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Broker endpoint.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one payload and wait for its reply.
    ///
    /// Fails with [`LinkError::NoResponse`] if no reply arrives within the
    /// reply timeout. The broker is not told; it finishes the exchange and
    /// the late reply is dropped by the next call.
    pub fn send(&mut self, payload: &[u8]) -> LinkResult<Vec<u8>> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.write_frame(&Frame::request(seq, payload))?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut read_buf = [0u8; 1024];
        loop {
            while let Some(frame) = self.codec.decode()? {
                if frame.kind == FrameKind::Reply && frame.seq == seq {
                    return Ok(frame.payload);
                }
                debug!(
                    "Discarding stale {:?} frame seq {} (waiting for {})",
                    frame.kind, frame.seq, seq
                );
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::NoResponse(self.reply_timeout));
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut read_buf) {
                Ok(0) => {
                    return Err(LinkError::BrokerUnreachable(format!(
                        "{}: connection closed by broker",
                        self.addr
                    )))
                }
                Ok(n) => self.codec.push(&read_buf[..n]),
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Err(LinkError::NoResponse(self.reply_timeout));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> LinkResult<()> {
        let bytes = frame.encode()?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Turn a broker reply into a device reply line or the matching error.
pub fn decode_relayed(reply: Vec<u8>) -> LinkResult<String> {
    let line = String::from_utf8(reply)
        .map_err(|_| LinkError::Framing("relayed reply is not UTF-8".to_string()))?;
    match line.as_str() {
        frame::DEVICE_TIMEOUT => Err(LinkError::TransportTimeout),
        frame::DEVICE_CLOSED => Err(LinkError::TransportClosed),
        s if s.starts_with(frame::ERROR_PREFIX) => Err(LinkError::Relay(line)),
        _ => Ok(line),
    }
}

fn connect_any(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

impl Transport for RemoteClient {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        let reply = self.send(command.as_bytes())?;
        decode_relayed(reply)
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        debug!("Closed broker connection {}", self.identity);
    }

    fn describe(&self) -> String {
        format!("broker {} as {}", self.addr, self.identity)
    }
}
