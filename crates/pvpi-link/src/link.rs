//! The path a client uses to reach the device.

use tracing::{info, warn};

use crate::error::{LinkError, LinkResult};
use crate::remote::{RemoteClient, RemoteConfig};
use crate::serial::{SerialConfig, SerialTransport};
use crate::transport::Transport;

/// Either a transport owned outright, or a relay through the broker.
///
/// Chosen once at construction; a `Link` never switches paths.
pub enum Link<T: Transport = SerialTransport> {
    /// This process owns the device line.
    Direct(T),
    /// Requests go through the broker.
    Relayed(RemoteClient),
}

/// Which path a [`Link`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Direct,
    Relayed,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Direct => "direct",
            LinkKind::Relayed => "relayed",
        }
    }
}

impl Link<SerialTransport> {
    /// Try the broker first; if it is unreachable, open the serial port.
    pub fn connect(remote: RemoteConfig, serial: SerialConfig) -> LinkResult<Self> {
        match RemoteClient::connect(remote) {
            Ok(client) => Ok(Link::Relayed(client)),
            Err(LinkError::BrokerUnreachable(detail)) => {
                warn!("Broker unreachable ({}); falling back to {}", detail, serial.port);
                let transport = SerialTransport::open(serial)?;
                info!("Using direct serial link");
                Ok(Link::Direct(transport))
            }
            Err(e) => Err(e),
        }
    }
}

impl<T: Transport> Link<T> {
    /// Which path this link uses.
    pub fn kind(&self) -> LinkKind {
        match self {
            Link::Direct(_) => LinkKind::Direct,
            Link::Relayed(_) => LinkKind::Relayed,
        }
    }
}

impl<T: Transport> Transport for Link<T> {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        match self {
            Link::Direct(transport) => transport.exchange(command),
            Link::Relayed(client) => client.exchange(command),
        }
    }

    fn close(&mut self) {
        match self {
            Link::Direct(transport) => transport.close(),
            Link::Relayed(client) => client.close(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Link::Direct(transport) => transport.describe(),
            Link::Relayed(client) => client.describe(),
        }
    }
}
