//! PV PI UART Protocol
//!
//! This crate provides types and utilities for talking to the PV PI charge
//! controller MCU over its UART. The MCU speaks a simple line-based ASCII
//! protocol: one request line in, one reply line out.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → MCU): `COMMAND,arg1,arg2,...` terminated with `\n`
//! - **Replies** (MCU → host): `TAG,field1,field2,...` terminated with `\r\n`
//!
//! The leading reply field is a tag. It is either a unit marker
//! (`MILLIVOLTS`, `MILLIAMPS`), a value class (`TEMP`, `CHARGE_STATE`,
//! `FAULT_CODE`), or an echo of the command followed by `OK`.
//!
//! # Command Types
//!
//! - **Readings**: `GET_BAT_V`, `GET_BAT_C`, `GET_PV_V`, `GET_PV_C`, `GET_TEMP`
//! - **Clock**: `SET_TIME`, `GET_TIME`, `SET_ALARM`
//! - **Power**: `POWER_OFF`, `WATCHDOG_ON`, `WATCHDOG_OFF`
//! - **Charger**: `SET_WAKEUP_MILIVOLT`, `SET_CHARGE_MILIAMPS`, `SET_MPPT_STATE`,
//!   `SET_TS_STATE`, `SET_CHARGE_STATE`, `GET_CHARGE_STATE`, `GET_FAULT_CODE`
//!
//! # Example
//!
//! ```rust
//! use pvpi_protocol::{Command, Reply, Unit};
//!
//! let line = Command::GetBatteryVoltage.to_command_string();
//! assert_eq!(line, "GET_BAT_V");
//!
//! let reply = Reply::parse("MILLIVOLTS,12500");
//! assert_eq!(reply.milli_value(Unit::Millivolts).unwrap(), 12.5);
//! ```

mod codec;
mod commands;
mod error;
mod responses;
mod types;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
pub use types::*;
