//! PV PI Manager
//!
//! Keeps a solar-powered Raspberry Pi alive on its PV PI board: polls and
//! records telemetry, feeds the MCU watchdog, and powers the system down on
//! low battery, on a schedule, or when the board stops answering.
//!
//! The [`SystemManager`] state machine is generic over the transport, the
//! host hooks and the clock, so a whole power cycle can run against a
//! [`SimulatedDevice`](pvpi_link::SimulatedDevice) on simulated time:
//!
//! ```rust
//! use std::sync::atomic::AtomicBool;
//! use chrono::NaiveDate;
//! use pvpi_client::PvPiClient;
//! use pvpi_link::SimulatedDevice;
//! use pvpi_manager::{ManualClock, Outcome, PowerConfig, ShutdownReason, SystemHost, SystemManager};
//!
//! let sim = SimulatedDevice::new();
//! sim.set_battery_voltage(12.0);
//! let start = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(10, 0, 0).unwrap();
//!
//! let mut manager = SystemManager::new(
//!     PvPiClient::new(sim.clone()),
//!     SystemHost { dry_run: true },
//!     ManualClock::new(start),
//!     PowerConfig::default(),
//! );
//! let outcome = manager.run(&AtomicBool::new(false));
//! assert!(matches!(
//!     outcome,
//!     Outcome::ShutDown { reason: ShutdownReason::LowBattery { .. }, error: false }
//! ));
//! ```

mod clock;
mod config;
mod error;
mod host;
mod service;
mod signal;
mod system_manager;
mod telemetry;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use host::*;
pub use service::*;
pub use signal::*;
pub use system_manager::*;
pub use telemetry::*;
