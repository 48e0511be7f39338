//! PV PI Client
//!
//! A typed façade over the PV PI command set. [`PvPiClient`] turns each
//! capability of the board into one method that builds the command, sends
//! it over a [`Transport`](pvpi_link::Transport) and decodes the reply.
//!
//! # Example
//!
//! ```rust
//! use pvpi_client::PvPiClient;
//! use pvpi_link::SimulatedDevice;
//!
//! let mut client = PvPiClient::new(SimulatedDevice::new());
//! assert!(client.get_alive().unwrap());
//! let volts = client.get_battery_voltage().unwrap();
//! assert!(volts > 12.0);
//! ```

mod client;
mod error;

pub use client::*;
pub use error::*;
