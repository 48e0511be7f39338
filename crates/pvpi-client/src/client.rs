//! The device client.

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use pvpi_link::{Link, RemoteConfig, SerialConfig, Transport};
use pvpi_protocol::{
    ChargeState, Command, DeviceTime, FaultState, Reply, SwitchState, Unit, TAG_TEMP,
};
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};

/// Accepted wake-up threshold, volts.
pub const WAKEUP_VOLTAGE_RANGE: RangeInclusive<f64> = 11.5..=14.4;

/// Accepted charge current limit, amps.
pub const CHARGE_CURRENT_RANGE: RangeInclusive<f64> = 0.4..=10.0;

/// Accepted power-off delay, seconds.
pub const POWER_OFF_DELAY_RANGE: RangeInclusive<u32> = 1..=60;

/// Accepted watchdog period, minutes.
pub const WATCHDOG_PERIOD_RANGE: RangeInclusive<u32> = 1..=60;

/// One round of readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// Battery voltage, volts.
    pub battery_voltage: f64,
    /// Battery current, amps.
    pub battery_current: f64,
    /// PV voltage, volts.
    pub pv_voltage: f64,
    /// PV current, amps.
    pub pv_current: f64,
    /// Board temperature, degrees Celsius.
    pub temperature: i32,
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "battery {:.3} V {:.3} A, PV {:.3} V {:.3} A, {} C",
            self.battery_voltage,
            self.battery_current,
            self.pv_voltage,
            self.pv_current,
            self.temperature
        )
    }
}

fn check_range<V>(
    name: &'static str,
    value: V,
    allowed: &RangeInclusive<V>,
    range: &'static str,
) -> ClientResult<()>
where
    V: PartialOrd + fmt::Display,
{
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ClientError::InvalidArgument {
            name,
            value: value.to_string(),
            range,
        })
    }
}

/// Typed operations on the PV PI.
///
/// Every operation is one request and one reply over the underlying
/// transport. Arguments are validated before anything is sent.
pub struct PvPiClient<T: Transport = Link> {
    transport: T,
}

impl PvPiClient<Link> {
    /// Reach the device through the broker if one answers, otherwise over
    /// the serial port directly.
    pub fn connect(remote: RemoteConfig, serial: SerialConfig) -> ClientResult<Self> {
        Ok(PvPiClient::new(Link::connect(remote, serial)?))
    }
}

impl<T: Transport> PvPiClient<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        PvPiClient { transport }
    }

    /// Get the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn request(&mut self, command: &Command) -> ClientResult<Reply> {
        let line = command.to_command_string();
        trace!("-> {}", line);
        let reply = Reply::parse(&self.transport.exchange(&line)?);
        trace!("<- {}", reply);
        Ok(reply)
    }

    fn set(&mut self, command: Command) -> ClientResult<()> {
        self.request(&command)?.expect_ack(command.name())?;
        debug!("{} acknowledged", command.to_command_string());
        Ok(())
    }

    fn reading(&mut self, command: Command, unit: Unit) -> ClientResult<f64> {
        Ok(self.request(&command)?.milli_value(unit)?)
    }

    // ========== Liveness ==========

    /// Whether the MCU answers `ALIVE`.
    pub fn get_alive(&mut self) -> ClientResult<bool> {
        Ok(self.request(&Command::GetAlive)?.is_alive())
    }

    // ========== Measurements ==========

    /// Battery voltage, volts.
    pub fn get_battery_voltage(&mut self) -> ClientResult<f64> {
        self.reading(Command::GetBatteryVoltage, Unit::Millivolts)
    }

    /// Battery current, amps.
    pub fn get_battery_current(&mut self) -> ClientResult<f64> {
        self.reading(Command::GetBatteryCurrent, Unit::Milliamps)
    }

    /// PV voltage, volts.
    pub fn get_pv_voltage(&mut self) -> ClientResult<f64> {
        self.reading(Command::GetPvVoltage, Unit::Millivolts)
    }

    /// PV current, amps.
    pub fn get_pv_current(&mut self) -> ClientResult<f64> {
        self.reading(Command::GetPvCurrent, Unit::Milliamps)
    }

    /// Board temperature, degrees Celsius.
    pub fn get_board_temp(&mut self) -> ClientResult<i32> {
        Ok(self
            .request(&Command::GetTemperature)?
            .tagged_number(TAG_TEMP)?)
    }

    /// Poll all five readings.
    pub fn read_telemetry(&mut self) -> ClientResult<TelemetrySample> {
        Ok(TelemetrySample {
            battery_voltage: self.get_battery_voltage()?,
            battery_current: self.get_battery_current()?,
            pv_voltage: self.get_pv_voltage()?,
            pv_current: self.get_pv_current()?,
            temperature: self.get_board_temp()?,
        })
    }

    // ========== Clock ==========

    /// Program the MCU clock. Only years 2000-2099 can be represented.
    pub fn set_mcu_time(&mut self, dt: &NaiveDateTime) -> ClientResult<()> {
        let time = DeviceTime::from_datetime(dt).ok_or_else(|| ClientError::InvalidArgument {
            name: "date",
            value: dt.to_string(),
            range: "2000-2099",
        })?;
        self.set(Command::SetTime { time })
    }

    /// Read the MCU clock.
    pub fn get_mcu_time(&mut self) -> ClientResult<NaiveDateTime> {
        let reply = self.request(&Command::GetTime)?;
        Ok(reply.device_time()?.to_datetime()?)
    }

    /// Arm the daily wake alarm.
    pub fn set_alarm(&mut self, at: NaiveTime) -> ClientResult<()> {
        self.set(Command::SetAlarm {
            hour: at.hour() as u8,
            minute: at.minute() as u8,
            second: at.second() as u8,
        })
    }

    // ========== Power ==========

    /// Cut host power after `delay_secs` (1-60).
    pub fn power_off(&mut self, delay_secs: u32) -> ClientResult<()> {
        check_range("power-off delay", delay_secs, &POWER_OFF_DELAY_RANGE, "1-60 s")?;
        self.set(Command::PowerOff {
            delay_secs: delay_secs as u8,
        })
    }

    /// Arm the power watchdog with a period of `period_mins` (1-60).
    pub fn set_watchdog(&mut self, period_mins: u32) -> ClientResult<()> {
        check_range("watchdog period", period_mins, &WATCHDOG_PERIOD_RANGE, "1-60 min")?;
        self.set(Command::WatchdogOn {
            period_mins: period_mins as u8,
        })
    }

    /// Disarm the power watchdog.
    pub fn stop_watchdog(&mut self) -> ClientResult<()> {
        self.set(Command::WatchdogOff)
    }

    // ========== Charger ==========

    /// Battery voltage at which the MCU wakes the host (11.5-14.4 V).
    pub fn set_wakeup_voltage(&mut self, volts: f64) -> ClientResult<()> {
        check_range("wake-up voltage", volts, &WAKEUP_VOLTAGE_RANGE, "11.5-14.4 V")?;
        self.set(Command::SetWakeupMillivolts {
            millivolts: (volts * 1000.0).round() as u32,
        })
    }

    /// Maximum battery charge current (0.4-10 A).
    pub fn set_max_charge_current(&mut self, amps: f64) -> ClientResult<()> {
        check_range("charge current", amps, &CHARGE_CURRENT_RANGE, "0.4-10 A")?;
        self.set(Command::SetChargeMilliamps {
            milliamps: (amps * 1000.0).round() as u32,
        })
    }

    /// Charger state.
    pub fn get_charge_state_code(&mut self) -> ClientResult<ChargeState> {
        Ok(self.request(&Command::GetChargeState)?.charge_state()?)
    }

    /// Charger state description.
    pub fn get_charge_state(&mut self) -> ClientResult<&'static str> {
        Ok(self.get_charge_state_code()?.description())
    }

    /// Raw charger fault bitmask.
    pub fn get_fault_code(&mut self) -> ClientResult<u8> {
        Ok(self.request(&Command::GetFaultCode)?.fault_mask()?)
    }

    /// Active charger faults, lowest bit first.
    pub fn get_fault_states(&mut self) -> ClientResult<Vec<FaultState>> {
        Ok(FaultState::decode_mask(self.get_fault_code()?))
    }

    /// Enable or disable maximum power point tracking.
    pub fn set_mppt_state(&mut self, state: SwitchState) -> ClientResult<()> {
        self.set(Command::SetMpptState(state))
    }

    /// Enable or disable battery temperature sensing.
    pub fn set_ts_state(&mut self, state: SwitchState) -> ClientResult<()> {
        self.set(Command::SetTsState(state))
    }

    /// Enable or disable charging.
    pub fn set_charge_state(&mut self, state: SwitchState) -> ClientResult<()> {
        self.set(Command::SetChargeState(state))
    }

    /// Release the underlying transport.
    pub fn close(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pvpi_link::{LinkError, SimulatedDevice};
    use pvpi_protocol::ProtocolError;

    fn client() -> (SimulatedDevice, PvPiClient<SimulatedDevice>) {
        let sim = SimulatedDevice::new();
        (sim.clone(), PvPiClient::new(sim))
    }

    #[test]
    fn test_readings() {
        let (sim, mut client) = client();
        sim.set_battery_voltage(12.345);
        assert!(client.get_alive().unwrap());
        assert_eq!(client.get_battery_voltage().unwrap(), 12.345);
        assert_eq!(client.get_battery_current().unwrap(), 0.25);
        assert_eq!(client.get_pv_voltage().unwrap(), 18.5);
        assert_eq!(client.get_pv_current().unwrap(), 1.2);
        assert_eq!(client.get_board_temp().unwrap(), 25);
    }

    #[test]
    fn test_read_telemetry() {
        let (_, mut client) = client();
        let sample = client.read_telemetry().unwrap();
        assert_eq!(sample.battery_voltage, 12.8);
        assert_eq!(sample.temperature, 25);
    }

    #[test]
    fn test_time_round_trip() {
        let (_, mut client) = client();
        let dt = NaiveDate::from_ymd_opt(2031, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        client.set_mcu_time(&dt).unwrap();
        assert_eq!(client.get_mcu_time().unwrap(), dt);
    }

    #[test]
    fn test_date_outside_century_sends_nothing() {
        let (sim, mut client) = client();
        let dt = NaiveDate::from_ymd_opt(2100, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let err = client.set_mcu_time(&dt).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { name: "date", .. }));
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn test_wakeup_voltage_boundaries() {
        let (sim, mut client) = client();
        for volts in [11.4999, 14.4001, f64::NAN] {
            assert!(matches!(
                client.set_wakeup_voltage(volts),
                Err(ClientError::InvalidArgument { .. })
            ));
        }
        assert!(sim.commands().is_empty());

        client.set_wakeup_voltage(11.5).unwrap();
        client.set_wakeup_voltage(14.4).unwrap();
        assert_eq!(
            sim.commands(),
            vec!["SET_WAKEUP_MILIVOLT,11500", "SET_WAKEUP_MILIVOLT,14400"]
        );
    }

    #[test]
    fn test_other_argument_ranges() {
        let (sim, mut client) = client();
        assert!(client.set_max_charge_current(0.39).is_err());
        assert!(client.set_max_charge_current(10.01).is_err());
        assert!(client.power_off(0).is_err());
        assert!(client.power_off(61).is_err());
        assert!(client.set_watchdog(0).is_err());
        assert!(client.set_watchdog(61).is_err());
        assert!(sim.commands().is_empty());

        client.set_max_charge_current(0.4).unwrap();
        client.power_off(60).unwrap();
        client.set_watchdog(1).unwrap();
        assert_eq!(
            sim.commands(),
            vec!["SET_CHARGE_MILIAMPS,400", "POWER_OFF,60", "WATCHDOG_ON,1"]
        );
        assert_eq!(sim.state().power_off_secs, Some(60));
    }

    #[test]
    fn test_switches_use_their_own_commands() {
        let (sim, mut client) = client();
        client.set_mppt_state(SwitchState::Off).unwrap();
        client.set_ts_state(SwitchState::Off).unwrap();
        client.set_charge_state(SwitchState::Off).unwrap();
        assert_eq!(
            sim.commands(),
            vec!["SET_MPPT_STATE,OFF", "SET_TS_STATE,OFF", "SET_CHARGE_STATE,OFF"]
        );
        assert_eq!(sim.state().charging, SwitchState::Off);
        assert_eq!(sim.state().ts, SwitchState::Off);
    }

    #[test]
    fn test_charge_and_fault_status() {
        let (sim, mut client) = client();
        sim.state().fault_mask = 0b1000_0100;
        sim.state().charge_state = ChargeState::TaperCharge;
        assert_eq!(client.get_charge_state_code().unwrap(), ChargeState::TaperCharge);
        assert_eq!(client.get_charge_state().unwrap(), "Taper Charge (CV mode)");
        assert_eq!(client.get_fault_code().unwrap(), 0x84);
        assert_eq!(
            client.get_fault_states().unwrap(),
            vec![FaultState::ChargeSafetyTimer, FaultState::InputUnderVoltage]
        );
    }

    #[test]
    fn test_alarm() {
        let (sim, mut client) = client();
        let at = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        client.set_alarm(at).unwrap();
        assert_eq!(sim.state().alarm, Some(at));
    }

    #[test]
    fn test_errors_are_classified() {
        let (sim, mut client) = client();
        sim.state().timeout = std::time::Duration::from_millis(1);
        sim.silence("GET_BAT_V");
        let err = client.get_battery_voltage().unwrap_err();
        assert!(err.is_link());
        assert!(matches!(err, ClientError::Link(LinkError::TransportTimeout)));

        // A current reading where a voltage was expected
        let mut swapped = PvPiClient::new(FixedReply("MILLIAMPS,100"));
        assert!(matches!(
            swapped.get_battery_voltage(),
            Err(ClientError::Protocol(ProtocolError::UnexpectedTag { .. }))
        ));
        assert!(matches!(
            swapped.stop_watchdog(),
            Err(ClientError::Protocol(ProtocolError::NotAcknowledged { .. }))
        ));
    }

    /// Transport that answers every command with the same line.
    struct FixedReply(&'static str);

    impl Transport for FixedReply {
        fn exchange(&mut self, _command: &str) -> pvpi_link::LinkResult<String> {
            Ok(self.0.to_string())
        }

        fn close(&mut self) {}

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }
}
