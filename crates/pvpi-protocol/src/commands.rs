//! Commands that can be sent to the PV PI MCU.
//!
//! The MCU supports several categories of commands:
//! - Measurement reads (battery, PV, temperature)
//! - Clock and alarm commands
//! - Power and watchdog commands
//! - Charger configuration and status

use std::fmt;

use crate::codec::LineCodec;
use crate::types::DeviceTime;

/// On/off argument for the charger switch commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    /// `ON`
    On,
    /// `OFF`
    Off,
}

impl SwitchState {
    /// Get the argument string used in commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "ON",
            SwitchState::Off => "OFF",
        }
    }

    /// Parse a switch state, case-insensitively.
    pub fn from_str(s: &str) -> Option<SwitchState> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(SwitchState::On),
            "OFF" => Some(SwitchState::Off),
            _ => None,
        }
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands that can be sent to the MCU.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ========== Liveness ==========
    /// Check that the MCU is responsive.
    GetAlive,

    // ========== Measurements ==========
    /// Battery voltage in millivolts.
    GetBatteryVoltage,

    /// Battery current in milliamps.
    GetBatteryCurrent,

    /// PV (solar) voltage in millivolts.
    GetPvVoltage,

    /// PV (solar) current in milliamps.
    GetPvCurrent,

    /// Board temperature in degrees Celsius.
    GetTemperature,

    // ========== Clock Commands ==========
    /// Set the MCU real-time clock.
    SetTime {
        /// Time to program, year within the century.
        time: DeviceTime,
    },

    /// Read the MCU real-time clock.
    GetTime,

    /// Arm the daily wake alarm.
    SetAlarm {
        /// Hours (0-23).
        hour: u8,
        /// Minutes (0-59).
        minute: u8,
        /// Seconds (0-59).
        second: u8,
    },

    // ========== Power Commands ==========
    /// Cut host power after a delay.
    PowerOff {
        /// Delay in seconds (1-60).
        delay_secs: u8,
    },

    /// Arm the power watchdog.
    WatchdogOn {
        /// Watchdog period in minutes (1-60).
        period_mins: u8,
    },

    /// Disarm the power watchdog.
    WatchdogOff,

    // ========== Charger Commands ==========
    /// Battery voltage at which the MCU wakes the host.
    SetWakeupMillivolts {
        /// Threshold in millivolts.
        millivolts: u32,
    },

    /// Maximum battery charge current.
    SetChargeMilliamps {
        /// Current limit in milliamps.
        milliamps: u32,
    },

    /// Read the charger state index.
    GetChargeState,

    /// Read the charger fault bitmask.
    GetFaultCode,

    /// Enable or disable maximum power point tracking.
    SetMpptState(SwitchState),

    /// Enable or disable battery temperature sensing.
    SetTsState(SwitchState),

    /// Enable or disable charging.
    SetChargeState(SwitchState),

    // ========== Raw Command ==========
    /// Send a raw command string.
    Raw {
        /// The raw command text.
        command: String,
    },
}

impl Command {
    /// Encode the command as a line to send to the MCU.
    /// Returns the bytes to send (including the `\n` terminator).
    pub fn encode(&self) -> Vec<u8> {
        let cmd_str = self.to_command_string();
        LineCodec::encode_command(&cmd_str)
    }

    /// The command name, which is also the first field on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetAlive => "GET_ALIVE",
            Command::GetBatteryVoltage => "GET_BAT_V",
            Command::GetBatteryCurrent => "GET_BAT_C",
            Command::GetPvVoltage => "GET_PV_V",
            Command::GetPvCurrent => "GET_PV_C",
            Command::GetTemperature => "GET_TEMP",
            Command::SetTime { .. } => "SET_TIME",
            Command::GetTime => "GET_TIME",
            Command::SetAlarm { .. } => "SET_ALARM",
            Command::PowerOff { .. } => "POWER_OFF",
            Command::WatchdogOn { .. } => "WATCHDOG_ON",
            Command::WatchdogOff => "WATCHDOG_OFF",
            Command::SetWakeupMillivolts { .. } => "SET_WAKEUP_MILIVOLT",
            Command::SetChargeMilliamps { .. } => "SET_CHARGE_MILIAMPS",
            Command::GetChargeState => "GET_CHARGE_STATE",
            Command::GetFaultCode => "GET_FAULT_CODE",
            Command::SetMpptState(_) => "SET_MPPT_STATE",
            Command::SetTsState(_) => "SET_TS_STATE",
            Command::SetChargeState(_) => "SET_CHARGE_STATE",
            Command::Raw { .. } => "RAW",
        }
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        let name = self.name();
        match self {
            Command::SetTime { time } => format!(
                "{},{},{},{},{},{},{}",
                name, time.year, time.month, time.day, time.hour, time.minute, time.second
            ),
            Command::SetAlarm { hour, minute, second } => {
                format!("{},{},{},{}", name, hour, minute, second)
            }
            Command::PowerOff { delay_secs } => format!("{},{}", name, delay_secs),
            Command::WatchdogOn { period_mins } => format!("{},{}", name, period_mins),
            Command::SetWakeupMillivolts { millivolts } => format!("{},{}", name, millivolts),
            Command::SetChargeMilliamps { milliamps } => format!("{},{}", name, milliamps),
            Command::SetMpptState(state)
            | Command::SetTsState(state)
            | Command::SetChargeState(state) => format!("{},{}", name, state),
            Command::Raw { command } => command.clone(),
            _ => name.to_string(),
        }
    }

    /// Parse a command line back into a [`Command`].
    ///
    /// Unknown command names become [`Command::Raw`]. Returns `None` for a
    /// known command with missing or malformed arguments.
    pub fn parse(line: &str) -> Option<Command> {
        let mut parts = line.trim().split(',').map(str::trim);
        let name = parts.next()?;
        let args: Vec<&str> = parts.collect();
        let arg = |i: usize| args.get(i).copied();
        let num = |i: usize| arg(i).and_then(|s| s.parse::<u32>().ok());
        let small = |i: usize| arg(i).and_then(|s| s.parse::<u8>().ok());

        let cmd = match name {
            "GET_ALIVE" => Command::GetAlive,
            "GET_BAT_V" => Command::GetBatteryVoltage,
            "GET_BAT_C" => Command::GetBatteryCurrent,
            "GET_PV_V" => Command::GetPvVoltage,
            "GET_PV_C" => Command::GetPvCurrent,
            "GET_TEMP" => Command::GetTemperature,
            "GET_TIME" => Command::GetTime,
            "SET_TIME" => Command::SetTime {
                time: DeviceTime {
                    year: small(0)?,
                    month: small(1)?,
                    day: small(2)?,
                    hour: small(3)?,
                    minute: small(4)?,
                    second: small(5)?,
                },
            },
            "SET_ALARM" => Command::SetAlarm {
                hour: small(0)?,
                minute: small(1)?,
                second: small(2)?,
            },
            "POWER_OFF" => Command::PowerOff { delay_secs: small(0)? },
            "WATCHDOG_ON" => Command::WatchdogOn { period_mins: small(0)? },
            "WATCHDOG_OFF" => Command::WatchdogOff,
            "SET_WAKEUP_MILIVOLT" => Command::SetWakeupMillivolts { millivolts: num(0)? },
            "SET_CHARGE_MILIAMPS" => Command::SetChargeMilliamps { milliamps: num(0)? },
            "GET_CHARGE_STATE" => Command::GetChargeState,
            "GET_FAULT_CODE" => Command::GetFaultCode,
            "SET_MPPT_STATE" => Command::SetMpptState(SwitchState::from_str(arg(0)?)?),
            "SET_TS_STATE" => Command::SetTsState(SwitchState::from_str(arg(0)?)?),
            "SET_CHARGE_STATE" => Command::SetChargeState(SwitchState::from_str(arg(0)?)?),
            _ => Command::Raw {
                command: line.trim().to_string(),
            },
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_get_battery_voltage() {
        assert_eq!(Command::GetBatteryVoltage.encode(), b"GET_BAT_V\n");
    }

    #[test]
    fn test_encode_set_time() {
        let cmd = Command::SetTime {
            time: DeviceTime {
                year: 24,
                month: 6,
                day: 15,
                hour: 7,
                minute: 5,
                second: 0,
            },
        };
        assert_eq!(cmd.to_command_string(), "SET_TIME,24,6,15,7,5,0");
    }

    #[test]
    fn test_encode_power_and_watchdog() {
        assert_eq!(
            Command::PowerOff { delay_secs: 20 }.to_command_string(),
            "POWER_OFF,20"
        );
        assert_eq!(
            Command::WatchdogOn { period_mins: 10 }.to_command_string(),
            "WATCHDOG_ON,10"
        );
        assert_eq!(Command::WatchdogOff.to_command_string(), "WATCHDOG_OFF");
    }

    #[test]
    fn test_encode_switches() {
        assert_eq!(
            Command::SetChargeState(SwitchState::On).to_command_string(),
            "SET_CHARGE_STATE,ON"
        );
        assert_eq!(
            Command::SetTsState(SwitchState::Off).to_command_string(),
            "SET_TS_STATE,OFF"
        );
    }

    #[test]
    fn test_parse_known_and_raw() {
        assert_eq!(
            Command::parse("SET_ALARM,8,0,0"),
            Some(Command::SetAlarm { hour: 8, minute: 0, second: 0 })
        );
        assert_eq!(
            Command::parse("SET_MPPT_STATE,on"),
            Some(Command::SetMpptState(SwitchState::On))
        );
        assert_eq!(
            Command::parse("FOO,1"),
            Some(Command::Raw { command: "FOO,1".to_string() })
        );
        assert_eq!(Command::parse("POWER_OFF"), None);
    }
}
