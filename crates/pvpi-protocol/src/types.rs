//! Value types carried by PV PI replies.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{ProtocolError, ProtocolResult};

/// First year representable on the MCU clock.
pub const CENTURY_BASE: i32 = 2000;

/// RTC value as exchanged on the wire.
///
/// The MCU has no century field; `year` is the year within the century and
/// is reconstructed as `2000 + year`. Correct operation is therefore
/// limited to 2000-2099.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTime {
    /// Year within the century (0-99).
    pub year: u8,
    /// Month (1-12).
    pub month: u8,
    /// Day of month (1-31).
    pub day: u8,
    /// Hours (0-23).
    pub hour: u8,
    /// Minutes (0-59).
    pub minute: u8,
    /// Seconds (0-59).
    pub second: u8,
}

impl DeviceTime {
    /// Convert a calendar date/time into wire fields.
    ///
    /// Returns `None` for years outside 2000-2099.
    pub fn from_datetime(dt: &NaiveDateTime) -> Option<DeviceTime> {
        let year = dt.year() - CENTURY_BASE;
        if !(0..=99).contains(&year) {
            return None;
        }
        Some(DeviceTime {
            year: year as u8,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    }

    /// Reconstruct the calendar date/time.
    pub fn to_datetime(&self) -> ProtocolResult<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            CENTURY_BASE + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
        .and_then(|date| {
            date.and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
        })
        .ok_or_else(|| ProtocolError::InvalidDateTime(self.to_string()))
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Charger state reported by `GET_CHARGE_STATE`.
///
/// The discriminant is the index sent by the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChargeState {
    NotCharging = 0,
    TrickleCharge = 1,
    PreCharge = 2,
    FastCharge = 3,
    TaperCharge = 4,
    Reserved = 5,
    TopOffTimerCharge = 6,
    ChargeTerminationDone = 7,
}

impl ChargeState {
    /// All states, in wire index order.
    pub const ALL: [ChargeState; 8] = [
        ChargeState::NotCharging,
        ChargeState::TrickleCharge,
        ChargeState::PreCharge,
        ChargeState::FastCharge,
        ChargeState::TaperCharge,
        ChargeState::Reserved,
        ChargeState::TopOffTimerCharge,
        ChargeState::ChargeTerminationDone,
    ];

    /// Look up a state by wire index.
    pub fn from_index(index: u8) -> ProtocolResult<ChargeState> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(ProtocolError::UnknownChargeState(index))
    }

    /// Wire index of this state.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ChargeState::NotCharging => "Not charging",
            ChargeState::TrickleCharge => "Trickle Charge (VBAT < VBAT_SHORT)",
            ChargeState::PreCharge => "Pre-Charge (VBAT < VBAT_LOWV)",
            ChargeState::FastCharge => "Fast Charge (CC mode)",
            ChargeState::TaperCharge => "Taper Charge (CV mode)",
            ChargeState::Reserved => "NA",
            ChargeState::TopOffTimerCharge => "Top-off Timer Charge",
            ChargeState::ChargeTerminationDone => "Charge Termination Done",
        }
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One bit of the charger fault bitmask reported by `GET_FAULT_CODE`.
///
/// The discriminant is the bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaultState {
    Reserved = 0,
    DrvSupPinVoltage = 1,
    ChargeSafetyTimer = 2,
    ThermalShutdown = 3,
    BatteryOverVoltage = 4,
    BatteryOverCurrent = 5,
    InputOverVoltage = 6,
    InputUnderVoltage = 7,
}

impl FaultState {
    /// All faults, in bit order.
    pub const ALL: [FaultState; 8] = [
        FaultState::Reserved,
        FaultState::DrvSupPinVoltage,
        FaultState::ChargeSafetyTimer,
        FaultState::ThermalShutdown,
        FaultState::BatteryOverVoltage,
        FaultState::BatteryOverCurrent,
        FaultState::InputOverVoltage,
        FaultState::InputUnderVoltage,
    ];

    /// Decode a fault bitmask into the set faults, lowest bit first.
    pub fn decode_mask(mask: u8) -> Vec<FaultState> {
        Self::ALL
            .iter()
            .copied()
            .filter(|fault| mask & fault.bit() != 0)
            .collect()
    }

    /// Bit position of this fault.
    pub fn position(self) -> u8 {
        self as u8
    }

    /// Mask with only this fault's bit set.
    pub fn bit(self) -> u8 {
        1 << self.position()
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            FaultState::Reserved => "NA",
            FaultState::DrvSupPinVoltage => "DRV_SUP pin voltage",
            FaultState::ChargeSafetyTimer => "Charge safety timer",
            FaultState::ThermalShutdown => "Thermal shutdown",
            FaultState::BatteryOverVoltage => "Battery over-voltage",
            FaultState::BatteryOverCurrent => "Battery over-current",
            FaultState::InputOverVoltage => "Input over-voltage",
            FaultState::InputUnderVoltage => "Input under-voltage",
        }
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_mask_decodes_set_bits_in_order() {
        assert_eq!(
            FaultState::decode_mask(5),
            vec![FaultState::Reserved, FaultState::ChargeSafetyTimer]
        );
        assert!(FaultState::decode_mask(0).is_empty());
        assert_eq!(FaultState::decode_mask(0xFF).len(), 8);
    }

    #[test]
    fn test_fault_mask_every_value() {
        for mask in 0..=u8::MAX {
            let faults = FaultState::decode_mask(mask);
            let positions: Vec<u8> = faults.iter().map(|f| f.position()).collect();
            let expected: Vec<u8> = (0..8).filter(|bit| mask & (1 << bit) != 0).collect();
            assert_eq!(positions, expected, "mask {mask:#04x}");
        }
    }

    #[test]
    fn test_charge_state_table() {
        assert_eq!(ChargeState::from_index(3).unwrap(), ChargeState::FastCharge);
        assert_eq!(ChargeState::from_index(7).unwrap().index(), 7);
        assert_eq!(
            ChargeState::from_index(8),
            Err(ProtocolError::UnknownChargeState(8))
        );
    }

    #[test]
    fn test_device_time_round_trip_across_century() {
        for year in [2000, 2024, 2099] {
            let dt = NaiveDate::from_ymd_opt(year, 2, 28)
                .unwrap()
                .and_hms_opt(23, 59, 58)
                .unwrap();
            let wire = DeviceTime::from_datetime(&dt).unwrap();
            assert_eq!(wire.to_datetime().unwrap(), dt);
        }
    }

    #[test]
    fn test_device_time_rejects_other_centuries() {
        let dt = NaiveDate::from_ymd_opt(2100, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(DeviceTime::from_datetime(&dt).is_none());

        let dt = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(DeviceTime::from_datetime(&dt).is_none());
    }

    #[test]
    fn test_invalid_device_date() {
        let wire = DeviceTime {
            year: 23,
            month: 2,
            day: 30,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert!(matches!(
            wire.to_datetime(),
            Err(ProtocolError::InvalidDateTime(_))
        ));
    }
}
