//! In-process model of the PV PI firmware.
//!
//! `SimulatedDevice` answers the full command table the way the MCU does, so
//! the broker, the client and the system manager can be exercised without
//! hardware. Clones share one state; a test keeps a clone to adjust readings
//! and inspect the command log while another clone is owned by the broker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::{Mutex, MutexGuard};
use pvpi_protocol::{ChargeState, Command, DeviceTime, SwitchState};
use tracing::debug;

use crate::error::{LinkError, LinkResult};
use crate::transport::Transport;

/// Firmware status for a set command outside its accepted range.
const FAIL: &str = "FAIL";

/// Observable and adjustable state of the simulated board.
#[derive(Debug, Clone)]
pub struct SimState {
    // ========== Readings ==========
    /// Battery voltage in millivolts.
    pub battery_mv: i64,
    /// Battery current in milliamps.
    pub battery_ma: i64,
    /// PV voltage in millivolts.
    pub pv_mv: i64,
    /// PV current in milliamps.
    pub pv_ma: i64,
    /// Board temperature in degrees Celsius.
    pub temperature: i32,
    /// Charger state.
    pub charge_state: ChargeState,
    /// Charger fault bitmask.
    pub fault_mask: u8,

    // ========== Clock ==========
    /// Real-time clock value.
    pub rtc: NaiveDateTime,
    /// Armed wake alarm.
    pub alarm: Option<NaiveTime>,

    // ========== Power ==========
    /// Armed watchdog period in minutes.
    pub watchdog_mins: Option<u8>,
    /// Requested power-off delay in seconds.
    pub power_off_secs: Option<u8>,
    /// Wake-up threshold in millivolts.
    pub wakeup_mv: Option<u32>,
    /// Charge current limit in milliamps.
    pub charge_ma: Option<u32>,
    pub mppt: SwitchState,
    pub ts: SwitchState,
    pub charging: SwitchState,

    // ========== Behaviour ==========
    /// Never answer anything.
    pub silent: bool,
    /// Never answer these command names.
    pub silent_commands: HashSet<String>,
    /// Fixed reply lines by command name, in place of the normal answer.
    pub overrides: HashMap<String, String>,
    /// Delay before every reply.
    pub latency: Duration,
    /// How long an unanswered exchange blocks before timing out.
    pub timeout: Duration,
    /// Set once the transport is closed.
    pub closed: bool,
    /// Every command line received, in order.
    pub log: Vec<String>,
}

impl Default for SimState {
    fn default() -> Self {
        let rtc = NaiveDate::from_ymd_opt(2024, 6, 15)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap_or_default();
        SimState {
            battery_mv: 12_800,
            battery_ma: 250,
            pv_mv: 18_500,
            pv_ma: 1_200,
            temperature: 25,
            charge_state: ChargeState::FastCharge,
            fault_mask: 0,
            rtc,
            alarm: None,
            watchdog_mins: None,
            power_off_secs: None,
            wakeup_mv: None,
            charge_ma: None,
            mppt: SwitchState::On,
            ts: SwitchState::On,
            charging: SwitchState::On,
            silent: false,
            silent_commands: HashSet::new(),
            overrides: HashMap::new(),
            latency: Duration::ZERO,
            timeout: Duration::from_millis(200),
            closed: false,
            log: Vec::new(),
        }
    }
}

/// A simulated PV PI board behind a [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// Create a board with default readings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a board from an explicit state.
    pub fn with_state(state: SimState) -> Self {
        SimulatedDevice {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the shared state for inspection or adjustment.
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }

    /// Set the battery voltage in volts.
    pub fn set_battery_voltage(&self, volts: f64) {
        self.state.lock().battery_mv = (volts * 1000.0).round() as i64;
    }

    /// Stop answering one command name.
    pub fn silence(&self, name: &str) {
        self.state.lock().silent_commands.insert(name.to_string());
    }

    /// Answer one command name with a fixed line.
    pub fn override_reply(&self, name: &str, reply: &str) {
        self.state
            .lock()
            .overrides
            .insert(name.to_string(), reply.to_string());
    }

    /// Command lines received so far.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Forget the received command lines.
    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }

    /// Produce the firmware reply for one command line, or `None` when the
    /// board stays silent.
    fn respond(state: &mut SimState, line: &str) -> Option<String> {
        state.log.push(line.to_string());
        let name = line.split(',').next().unwrap_or("").trim().to_string();
        if state.silent || state.silent_commands.contains(&name) {
            return None;
        }
        if let Some(reply) = state.overrides.get(&name) {
            return Some(reply.clone());
        }

        let Some(command) = Command::parse(line) else {
            return Some(format!("{},{}", name, FAIL));
        };
        let ack = |ok: bool| format!("{},{}", command.name(), if ok { "OK" } else { FAIL });

        let reply = match &command {
            Command::GetAlive => "ALIVE".to_string(),
            Command::GetBatteryVoltage => format!("MILLIVOLTS,{}", state.battery_mv),
            Command::GetBatteryCurrent => format!("MILLIAMPS,{}", state.battery_ma),
            Command::GetPvVoltage => format!("MILLIVOLTS,{}", state.pv_mv),
            Command::GetPvCurrent => format!("MILLIAMPS,{}", state.pv_ma),
            Command::GetTemperature => format!("TEMP,{}", state.temperature),
            Command::GetTime => match DeviceTime::from_datetime(&state.rtc) {
                Some(t) => format!(
                    "GET_TIME,{},{},{},{},{},{}",
                    t.year, t.month, t.day, t.hour, t.minute, t.second
                ),
                None => format!("GET_TIME,{}", FAIL),
            },
            Command::SetTime { time } => match time.to_datetime() {
                Ok(dt) => {
                    state.rtc = dt;
                    ack(true)
                }
                Err(_) => ack(false),
            },
            Command::SetAlarm {
                hour,
                minute,
                second,
            } => {
                let alarm =
                    NaiveTime::from_hms_opt(u32::from(*hour), u32::from(*minute), u32::from(*second));
                if alarm.is_some() {
                    state.alarm = alarm;
                }
                ack(alarm.is_some())
            }
            Command::PowerOff { delay_secs } => {
                let ok = (1..=60).contains(delay_secs);
                if ok {
                    state.power_off_secs = Some(*delay_secs);
                }
                ack(ok)
            }
            Command::WatchdogOn { period_mins } => {
                let ok = (1..=60).contains(period_mins);
                if ok {
                    state.watchdog_mins = Some(*period_mins);
                }
                ack(ok)
            }
            Command::WatchdogOff => {
                state.watchdog_mins = None;
                ack(true)
            }
            Command::SetWakeupMillivolts { millivolts } => {
                state.wakeup_mv = Some(*millivolts);
                ack(true)
            }
            Command::SetChargeMilliamps { milliamps } => {
                state.charge_ma = Some(*milliamps);
                ack(true)
            }
            Command::GetChargeState => format!("CHARGE_STATE,{}", state.charge_state.index()),
            Command::GetFaultCode => format!("FAULT_CODE,{}", state.fault_mask),
            Command::SetMpptState(s) => {
                state.mppt = *s;
                ack(true)
            }
            Command::SetTsState(s) => {
                state.ts = *s;
                ack(true)
            }
            Command::SetChargeState(s) => {
                state.charging = *s;
                ack(true)
            }
            Command::Raw { .. } => format!("{},{}", name, FAIL),
        };
        Some(reply)
    }
}

impl Transport for SimulatedDevice {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        let (reply, latency, timeout) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LinkError::TransportClosed);
            }
            let reply = Self::respond(&mut state, command.trim());
            (reply, state.latency, state.timeout)
        };

        match reply {
            Some(reply) => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                debug!("Simulated device: {} -> {}", command, reply);
                Ok(reply)
            }
            None => {
                thread::sleep(timeout);
                debug!("Simulated device: {} -> (silent)", command);
                Err(LinkError::TransportTimeout)
            }
        }
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }

    fn describe(&self) -> String {
        "simulated PV PI".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings() {
        let mut sim = SimulatedDevice::new();
        sim.set_battery_voltage(12.3);
        assert_eq!(sim.exchange("GET_BAT_V").unwrap(), "MILLIVOLTS,12300");
        assert_eq!(sim.exchange("GET_PV_C").unwrap(), "MILLIAMPS,1200");
        assert_eq!(sim.exchange("GET_TEMP").unwrap(), "TEMP,25");
        assert_eq!(sim.exchange("GET_ALIVE").unwrap(), "ALIVE");
    }

    #[test]
    fn test_set_commands_ack_and_update_state() {
        let mut sim = SimulatedDevice::new();
        assert_eq!(sim.exchange("WATCHDOG_ON,10").unwrap(), "WATCHDOG_ON,OK");
        assert_eq!(sim.state().watchdog_mins, Some(10));
        assert_eq!(sim.exchange("WATCHDOG_OFF").unwrap(), "WATCHDOG_OFF,OK");
        assert_eq!(sim.state().watchdog_mins, None);
        assert_eq!(sim.exchange("SET_ALARM,8,30,0").unwrap(), "SET_ALARM,OK");
        assert_eq!(sim.state().alarm, NaiveTime::from_hms_opt(8, 30, 0));
    }

    #[test]
    fn test_out_of_range_fails() {
        let mut sim = SimulatedDevice::new();
        assert_eq!(sim.exchange("POWER_OFF,0").unwrap(), "POWER_OFF,FAIL");
        assert_eq!(sim.exchange("WATCHDOG_ON,61").unwrap(), "WATCHDOG_ON,FAIL");
        assert_eq!(sim.exchange("SET_ALARM,25,0,0").unwrap(), "SET_ALARM,FAIL");
        assert_eq!(sim.exchange("BOGUS").unwrap(), "BOGUS,FAIL");
    }

    #[test]
    fn test_override_reply() {
        let mut sim = SimulatedDevice::new();
        sim.override_reply("GET_BAT_V", "MILLIAMPS,5");
        assert_eq!(sim.exchange("GET_BAT_V").unwrap(), "MILLIAMPS,5");
    }

    #[test]
    fn test_time_round_trip() {
        let mut sim = SimulatedDevice::new();
        assert_eq!(sim.exchange("SET_TIME,25,1,2,3,4,5").unwrap(), "SET_TIME,OK");
        assert_eq!(sim.exchange("GET_TIME").unwrap(), "GET_TIME,25,1,2,3,4,5");
    }

    #[test]
    fn test_silent_and_closed() {
        let mut sim = SimulatedDevice::new();
        sim.state().timeout = Duration::from_millis(1);
        sim.silence("GET_BAT_V");
        assert!(matches!(sim.exchange("GET_BAT_V"), Err(LinkError::TransportTimeout)));
        assert!(sim.exchange("GET_BAT_C").is_ok());

        sim.close();
        assert!(matches!(sim.exchange("GET_ALIVE"), Err(LinkError::TransportClosed)));
        assert_eq!(sim.commands(), vec!["GET_BAT_V", "GET_BAT_C"]);
    }
}
