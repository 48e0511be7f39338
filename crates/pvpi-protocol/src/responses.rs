//! Reply parsing for the PV PI protocol.
//!
//! Replies from the MCU are single comma-separated lines. The first field is
//! a tag; the rest are values:
//! - Readings: `MILLIVOLTS,<int>`, `MILLIAMPS,<int>`, `TEMP,<int>`
//! - Status: `CHARGE_STATE,<0..7>`, `FAULT_CODE,<0..255>`
//! - Clock: `GET_TIME,YY,MM,DD,HH,MM,SS`
//! - Acknowledgements: `<COMMAND>,OK`
//! - Liveness: `ALIVE`

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{ChargeState, DeviceTime};

/// Reply to `GET_ALIVE`.
pub const ALIVE: &str = "ALIVE";

/// Acknowledgement value of set commands.
pub const ACK_OK: &str = "OK";

/// Tag of `GET_TEMP` replies.
pub const TAG_TEMP: &str = "TEMP";

/// Tag of `GET_TIME` replies.
pub const TAG_TIME: &str = "GET_TIME";

/// Tag of `GET_CHARGE_STATE` replies.
pub const TAG_CHARGE_STATE: &str = "CHARGE_STATE";

/// Tag of `GET_FAULT_CODE` replies.
pub const TAG_FAULT_CODE: &str = "FAULT_CODE";

/// Unit markers for milli-unit readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// `MILLIVOLTS`
    Millivolts,
    /// `MILLIAMPS`
    Milliamps,
}

impl Unit {
    /// Get the tag string used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Millivolts => "MILLIVOLTS",
            Unit::Milliamps => "MILLIAMPS",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed reply line.
///
/// Field positions follow the wire: position 0 is the tag, values start at
/// position 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    raw: String,
    fields: Vec<String>,
}

impl Reply {
    /// Parse a reply line.
    ///
    /// Whitespace around every field is dropped; some firmware builds pad
    /// the `OK` of alarm replies.
    pub fn parse(line: &str) -> Reply {
        let raw = line.trim().to_string();
        let fields = raw.split(',').map(|f| f.trim().to_string()).collect();
        Reply { raw, fields }
    }

    /// The raw reply line (trimmed).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The leading tag.
    pub fn tag(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    /// Fields after the tag.
    pub fn values(&self) -> &[String] {
        self.fields.get(1..).unwrap_or_default()
    }

    /// Whether this is the `ALIVE` reply.
    pub fn is_alive(&self) -> bool {
        self.raw == ALIVE
    }

    /// Check the leading tag.
    pub fn expect_tag(&self, expected: &str) -> ProtocolResult<&Self> {
        if self.tag() == expected {
            Ok(self)
        } else {
            log::trace!("reply {:?} does not carry tag {}", self.raw, expected);
            Err(ProtocolError::UnexpectedTag {
                expected: expected.to_string(),
                received: self.tag().to_string(),
            })
        }
    }

    /// Get the field at a wire position.
    pub fn field(&self, position: usize) -> ProtocolResult<&str> {
        self.fields
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| ProtocolError::MissingField {
                reply: self.raw.clone(),
                index: position,
            })
    }

    /// Parse the field at a wire position as a number.
    pub fn number<T: FromStr>(&self, position: usize) -> ProtocolResult<T> {
        let value = self.field(position)?;
        value.parse().map_err(|_| ProtocolError::InvalidNumber {
            reply: self.raw.clone(),
            value: value.to_string(),
        })
    }

    /// Decode `<tag>,<int>`.
    pub fn tagged_number<T: FromStr>(&self, tag: &str) -> ProtocolResult<T> {
        self.expect_tag(tag)?.number(1)
    }

    /// Decode a milli-unit reading into base units (volts or amps).
    pub fn milli_value(&self, unit: Unit) -> ProtocolResult<f64> {
        let milli: i64 = self.tagged_number(unit.as_str())?;
        Ok(milli as f64 / 1000.0)
    }

    /// Check the `<COMMAND>,OK` acknowledgement of a set command.
    ///
    /// Anything other than `OK` in the second field is a failure.
    pub fn expect_ack(&self, command: &'static str) -> ProtocolResult<()> {
        match self.fields.get(1) {
            Some(status) if status == ACK_OK && self.fields.len() == 2 => Ok(()),
            _ => Err(ProtocolError::NotAcknowledged {
                command,
                reply: self.raw.clone(),
            }),
        }
    }

    /// Decode a `GET_TIME,YY,MM,DD,HH,MM,SS` reply.
    pub fn device_time(&self) -> ProtocolResult<DeviceTime> {
        self.expect_tag(TAG_TIME)?;
        Ok(DeviceTime {
            year: self.number(1)?,
            month: self.number(2)?,
            day: self.number(3)?,
            hour: self.number(4)?,
            minute: self.number(5)?,
            second: self.number(6)?,
        })
    }

    /// Decode a `CHARGE_STATE,<n>` reply.
    pub fn charge_state(&self) -> ProtocolResult<ChargeState> {
        let index: u8 = self.tagged_number(TAG_CHARGE_STATE)?;
        ChargeState::from_index(index)
    }

    /// Decode a `FAULT_CODE,<mask>` reply.
    pub fn fault_mask(&self) -> ProtocolResult<u8> {
        self.tagged_number(TAG_FAULT_CODE)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
