//! PV PI Link Layer
//!
//! Everything between the protocol and the wire: the [`Transport`] that owns
//! the serial line, the broker that lets several local processes share that
//! line, and the client-side [`RemoteClient`] that talks to the broker.
//!
//! # Architecture
//!
//! ```text
//! client ──┐                    ┌──────────────┐
//! client ──┼── TCP frames ──▶   │ Broker       │ ── Transport ── /dev/ttyAMA0
//! client ──┘   (identity,seq)   │ one worker   │
//!                               └──────────────┘
//! ```
//!
//! A process that cannot reach a broker opens the port itself; see
//! [`Link::connect`].
//!
//! # Example
//!
//! ```rust
//! use pvpi_link::{SimulatedDevice, Transport};
//!
//! let mut device = SimulatedDevice::new();
//! assert_eq!(device.exchange("GET_ALIVE").unwrap(), "ALIVE");
//! ```

mod broker;
mod error;
mod frame;
mod link;
mod remote;
mod serial;
mod sim;
mod transport;

pub use broker::*;
pub use error::*;
pub use frame::*;
pub use link::*;
pub use remote::*;
pub use serial::*;
pub use sim::*;
pub use transport::*;
