//! The power management state machine.
//!
//! ```text
//! Starting ──▶ Monitoring ──▶ ShuttingDown ──▶ Halted
//!     │             │
//!     └── stop ─────┴──▶ (watchdog off, link released) ──▶ Halted
//! ```
//!
//! `Starting` checks the board, syncs clocks, programs the wake-up voltage
//! and arms the watchdog. `Monitoring` checks the schedule every
//! `check_interval` and polls telemetry every `log_period`. `ShuttingDown`
//! arms the wake alarm, disarms the watchdog, asks the MCU to cut power and
//! asks the host to shut down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use pvpi_client::{ClientError, ClientResult, PvPiClient, TelemetrySample};
use pvpi_link::Transport;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{ClockSync, PowerConfig};
use crate::telemetry::{TelemetryRow, TelemetrySink};

/// Why the manager decided to power down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShutdownReason {
    /// The scheduled shutdown time was reached.
    ScheduledTime,
    /// Battery voltage fell to the low threshold.
    LowBattery { voltage: f64 },
    /// The device stopped answering, or kept answering nonsense.
    CommunicationFailure,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ScheduledTime => write!(f, "scheduled shutdown time"),
            ShutdownReason::LowBattery { voltage } => write!(f, "low battery ({:.3} V)", voltage),
            ShutdownReason::CommunicationFailure => write!(f, "communication failure"),
        }
    }
}

/// Manager states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManagerState {
    Starting,
    Monitoring,
    ShuttingDown(ShutdownReason),
    Halted,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The shutdown sequence ran.
    ShutDown {
        reason: ShutdownReason,
        /// Set when the shutdown was caused by a device error.
        error: bool,
    },
    /// An operator stop arrived first; power was left on.
    Interrupted,
}

/// Drives one board through its power lifecycle.
pub struct SystemManager<T: Transport, H, C> {
    client: PvPiClient<T>,
    host: H,
    clock: C,
    telemetry: Option<Box<dyn TelemetrySink>>,
    config: PowerConfig,
    state: ManagerState,
    last_poll: Option<NaiveDateTime>,
    failed_polls: u32,
    error: bool,
    outcome: Option<Outcome>,
}

impl<T, H, C> SystemManager<T, H, C>
where
    T: Transport,
    H: crate::host::HostControl,
    C: Clock,
{
    pub fn new(client: PvPiClient<T>, host: H, clock: C, config: PowerConfig) -> Self {
        SystemManager {
            client,
            host,
            clock,
            telemetry: None,
            config,
            state: ManagerState::Starting,
            last_poll: None,
            failed_polls: 0,
            error: false,
            outcome: None,
        }
    }

    /// Record every telemetry poll in `sink`.
    pub fn with_telemetry(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Whether a device error drove the manager into shutdown.
    pub fn error_flag(&self) -> bool {
        self.error
    }

    pub fn client(&self) -> &PvPiClient<T> {
        &self.client
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Run until halted or stopped.
    pub fn run(&mut self, stop: &AtomicBool) -> Outcome {
        loop {
            if let Some(outcome) = self.step(stop) {
                return outcome;
            }
        }
    }

    /// Perform one transition. Returns the outcome once `Halted`.
    pub fn step(&mut self, stop: &AtomicBool) -> Option<Outcome> {
        if stop.load(Ordering::SeqCst)
            && matches!(self.state, ManagerState::Starting | ManagerState::Monitoring)
        {
            self.interrupt();
        }

        match self.state {
            ManagerState::Starting => self.start(stop),
            ManagerState::Monitoring => {
                self.check();
                if self.state == ManagerState::Monitoring {
                    let interval = self.config.check_interval();
                    self.clock.sleep(interval, stop);
                }
            }
            ManagerState::ShuttingDown(reason) => self.shut_down(reason),
            ManagerState::Halted => return self.outcome,
        }

        // A stop that arrived while starting or polling wins over a shutdown
        // decided in the same step.
        if stop.load(Ordering::SeqCst) && matches!(self.state, ManagerState::ShuttingDown(_)) {
            self.interrupt();
        }
        None
    }

    /// Wait in `Halted` until `stop` is set.
    pub fn idle(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            info!("Halted, waiting for power-off");
            self.clock.sleep(self.config.check_interval(), stop);
        }
    }

    // ========== Starting ==========

    fn start(&mut self, stop: &AtomicBool) {
        info!("Starting PV PI manager");
        match self.client.get_alive() {
            Ok(true) => info!("Alive: true"),
            Ok(false) => warn!("Board answered but not with ALIVE"),
            Err(e) => {
                error!("Board is not answering: {}", e);
                return self.fail();
            }
        }

        if let Err(e) = self.sync_clocks() {
            if self.fatal(&e, "clock sync") {
                return;
            }
        }

        if let Some(volts) = self.config.wakeup_voltage {
            match self.client.set_wakeup_voltage(volts) {
                Ok(()) => info!("Wake-up voltage set to {} V", volts),
                Err(e) => {
                    if self.fatal(&e, "wake-up voltage") {
                        return;
                    }
                }
            }
        }

        if self.config.startup_delay_secs > 0 {
            info!("{}s startup delay", self.config.startup_delay_secs);
            self.clock
                .sleep(std::time::Duration::from_secs(self.config.startup_delay_secs), stop);
            if stop.load(Ordering::SeqCst) {
                return;
            }
        }

        info!("Log period: {} minutes", self.config.log_period_mins);
        info!(
            "Time schedule: {}",
            if self.config.schedule_enabled { "On" } else { "Off" }
        );
        info!(
            "Watchdog: {}",
            if self.config.watchdog_enabled { "On" } else { "Off" }
        );
        if self.config.watchdog_enabled {
            if let Err(e) = self.client.set_watchdog(self.config.watchdog_period()) {
                if self.fatal(&e, "watchdog") {
                    return;
                }
            }
        }

        self.state = ManagerState::Monitoring;
    }

    fn sync_clocks(&mut self) -> ClientResult<()> {
        match self.config.clock_sync {
            ClockSync::None => {}
            ClockSync::PiToMcu => {
                let now = self.clock.now();
                self.client.set_mcu_time(&now)?;
                info!("MCU clock set to {}", now);
            }
            ClockSync::McuToPi => {
                let mcu_time = self.client.get_mcu_time()?;
                match self.host.set_system_time(mcu_time) {
                    Ok(()) => info!("System clock set to {}", mcu_time),
                    Err(e) => warn!("Could not set system clock: {}", e),
                }
            }
        }
        Ok(())
    }

    /// Log a setup error. Link errors end setup; anything else is skipped.
    fn fatal(&mut self, err: &ClientError, step: &str) -> bool {
        if err.is_link() {
            error!("{} failed, device unreachable: {}", step, err);
            self.fail();
            true
        } else {
            warn!("{} failed: {}", step, err);
            false
        }
    }

    fn fail(&mut self) {
        self.error = true;
        self.state = ManagerState::ShuttingDown(ShutdownReason::CommunicationFailure);
    }

    // ========== Monitoring ==========

    fn check(&mut self) {
        let now = self.clock.now();
        if self.config.schedule_enabled && now.time() >= self.config.shutdown_time {
            info!("Shutdown time reached");
            self.state = ManagerState::ShuttingDown(ShutdownReason::ScheduledTime);
            return;
        }

        let due = match self.last_poll {
            None => true,
            Some(last) => (now - last).to_std().unwrap_or_default() >= self.config.log_period(),
        };
        if due {
            self.last_poll = Some(now);
            self.poll(now);
        }
    }

    fn poll(&mut self, now: NaiveDateTime) {
        let sample = match self.read_all() {
            Ok(sample) => sample,
            Err(e) if e.is_link() => {
                error!("Lost contact with the board: {}", e);
                return self.fail();
            }
            Err(e) => {
                self.failed_polls += 1;
                warn!(
                    "Telemetry gap ({} of {}): {}",
                    self.failed_polls, self.config.max_failed_polls, e
                );
                if self.failed_polls >= self.config.max_failed_polls {
                    error!("Too many unreadable polls");
                    self.fail();
                }
                return;
            }
        };
        self.failed_polls = 0;

        info!("Battery: {} V, {} A", sample.battery_voltage, sample.battery_current);
        info!("PV: {} V, {} A", sample.pv_voltage, sample.pv_current);
        info!("PV PI Temp: {}C", sample.temperature);

        if let Some(sink) = self.telemetry.as_mut() {
            let row = TelemetryRow {
                timestamp: now,
                sample,
            };
            if let Err(e) = sink.append(&row) {
                warn!("Could not record telemetry: {}", e);
            }
        }

        if sample.battery_voltage <= self.config.low_battery_voltage {
            info!("Shutdown voltage reached");
            self.state = ManagerState::ShuttingDown(ShutdownReason::LowBattery {
                voltage: sample.battery_voltage,
            });
            return;
        }

        if self.config.watchdog_enabled {
            if let Err(e) = self.client.set_watchdog(self.config.watchdog_period()) {
                if e.is_link() {
                    error!("Could not refresh watchdog: {}", e);
                    self.fail();
                } else {
                    warn!("Could not refresh watchdog: {}", e);
                }
            }
        }
    }

    fn read_all(&mut self) -> ClientResult<TelemetrySample> {
        if !self.client.get_alive()? {
            warn!("Board answered but not with ALIVE");
        }
        let mcu_time = self.client.get_mcu_time()?;
        info!("MCU time: {}, system time: {}", mcu_time, self.clock.now());
        self.client.read_telemetry()
    }

    // ========== Shutting down ==========

    fn shut_down(&mut self, reason: ShutdownReason) {
        info!("Shutting down: {}", reason);

        if self.config.schedule_enabled {
            match self.client.set_alarm(self.config.wakeup_time) {
                Ok(()) => info!("Wake alarm set for {}", self.config.wakeup_time),
                Err(e) => error!("Could not set wake alarm: {}", e),
            }
        }
        if let Err(e) = self.client.stop_watchdog() {
            error!("Could not disable watchdog: {}", e);
        }
        match self.client.power_off(self.config.off_delay_secs) {
            Ok(()) => info!("Power off in {}s", self.config.off_delay_secs),
            Err(e) => error!("Could not schedule power off: {}", e),
        }
        if let Err(e) = self.host.request_shutdown() {
            error!("Could not shut down host: {}", e);
        }

        self.outcome = Some(Outcome::ShutDown {
            reason,
            error: self.error,
        });
        self.state = ManagerState::Halted;
    }

    fn interrupt(&mut self) {
        warn!("Interrupt received, cleaning up");
        if self.config.watchdog_enabled {
            if let Err(e) = self.client.stop_watchdog() {
                error!("Could not disable watchdog: {}", e);
            }
        }
        self.client.close();
        self.outcome = Some(Outcome::Interrupted);
        self.state = ManagerState::Halted;
        info!("Exiting without power off");
    }
}
