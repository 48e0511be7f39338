//! `pvpi`: broker, power manager and maintenance commands for the PV PI.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use pvpi_client::PvPiClient;
use pvpi_link::{Broker, BrokerConfig, Link, SerialTransport, SimulatedDevice, Transport};
use pvpi_protocol::SwitchState;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pvpi_manager::{
    on_stop_signal, stop_flag_on_signal, CsvTelemetryLog, ManagerError, ManagerResult, Outcome,
    PvPiConfig, ServiceInstaller, SystemClock, SystemHost, SystemManager, TelemetrySink,
    DEFAULT_UNIT_DIR,
};

/// PV PI power management tools.
#[derive(Parser, Debug)]
#[command(name = "pvpi")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Cmd,

    /// Configuration file (default: search PVPI_CONFIG, ./pvpi.yaml, /etc/pvpi/config.yaml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Own the serial port and relay requests from local clients.
    Broker {
        /// Address to listen on (overrides the config).
        #[arg(long)]
        bind: Option<String>,
        /// Serial port (overrides the config).
        #[arg(long)]
        port: Option<String>,
        /// Serve a simulated board instead of the serial port.
        #[arg(long)]
        simulate: bool,
    },
    /// Run the power manager until shutdown.
    Manager {
        /// Log host commands instead of running them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the board status and readings.
    Status,
    /// Set the MCU clock from the system clock.
    SetMcuTime,
    /// Exercise every board command once.
    SelfTest,
    /// Print the effective configuration.
    Config,
    /// Install and start the broker and manager services.
    Install {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Stop, disable and remove the services.
    Uninstall {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Restart both services.
    Restart {
        #[command(flatten)]
        service: ServiceArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ServiceArgs {
    /// User the services run as (default: SUDO_USER, then USER).
    #[arg(long)]
    user: Option<String>,
    /// Directory holding the unit files.
    #[arg(long, default_value = DEFAULT_UNIT_DIR)]
    unit_dir: PathBuf,
    /// Log the unit files and systemctl calls instead of applying them.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> ManagerResult<()> {
    // Service commands only need the path, not a loadable config.
    match args.command {
        Cmd::Install { service } => return installer(service, args.config)?.install(),
        Cmd::Uninstall { service } => return installer(service, args.config)?.uninstall(),
        Cmd::Restart { service } => return installer(service, args.config)?.restart(),
        _ => {}
    }

    let config = match &args.config {
        Some(path) => PvPiConfig::load_from(path)?,
        None => PvPiConfig::load()?,
    };
    config.validate()?;

    match args.command {
        Cmd::Broker {
            bind,
            port,
            simulate,
        } => {
            let mut broker_config = config.broker.broker_config();
            if let Some(bind) = bind {
                broker_config.bind_addr = bind;
            }
            if simulate {
                serve(SimulatedDevice::new(), broker_config)
            } else {
                let mut serial = config.device.serial_config();
                if let Some(port) = port {
                    serial.port = port;
                }
                serve(SerialTransport::open(serial)?, broker_config)
            }
        }
        Cmd::Manager { dry_run } => run_manager(&config, dry_run),
        Cmd::Status => status(&config),
        Cmd::SetMcuTime => set_mcu_time(&config),
        Cmd::SelfTest => self_test(&config),
        Cmd::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
        Cmd::Install { .. } | Cmd::Uninstall { .. } | Cmd::Restart { .. } => Ok(()),
    }
}

fn connect(config: &PvPiConfig) -> ManagerResult<PvPiClient<Link>> {
    let client = PvPiClient::connect(config.broker.remote_config(), config.device.serial_config())?;
    info!(
        "Connected to {} ({})",
        client.transport().describe(),
        client.transport().kind().as_str()
    );
    Ok(client)
}

// ========== broker ==========

fn serve<T: Transport>(transport: T, config: BrokerConfig) -> ManagerResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    on_stop_signal(move || {
        info!("Stopping broker");
        let _ = shutdown_tx.send(true);
    })?;

    runtime.block_on(async {
        let broker = Broker::bind(transport, config).await?;
        broker.run(shutdown_rx).await
    })?;
    info!("Broker stopped");
    Ok(())
}

// ========== manager ==========

fn run_manager(config: &PvPiConfig, dry_run: bool) -> ManagerResult<()> {
    let stop = stop_flag_on_signal()?;

    let client = connect(config)?;
    let host = SystemHost { dry_run };
    let mut manager = SystemManager::new(client, host, SystemClock, config.power.clone());

    if config.telemetry.enabled {
        let today = Local::now().date_naive();
        match CsvTelemetryLog::open(&config.telemetry.directory, config.telemetry.retention_days, today) {
            Ok(log) => {
                let sink: Box<dyn TelemetrySink> = Box::new(log);
                manager = manager.with_telemetry(sink);
            }
            Err(e) => warn!("Telemetry disabled: {}", e),
        }
    }

    match manager.run(&stop) {
        Outcome::ShutDown { reason, error } => {
            if error {
                warn!("Shut down after a device error ({})", reason);
            } else {
                info!("Shut down: {}", reason);
            }
            manager.idle(&stop);
        }
        Outcome::Interrupted => info!("Manager stopped"),
    }
    Ok(())
}

// ========== services ==========

fn installer(
    args: ServiceArgs,
    config: Option<PathBuf>,
) -> ManagerResult<ServiceInstaller<SystemHost>> {
    let user = args
        .user
        .or_else(|| std::env::var("SUDO_USER").ok())
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| {
            ManagerError::InvalidConfig("cannot tell which user runs the services; pass --user".into())
        })?;
    let exe = std::env::current_exe()?;
    let config = config.map(|path| std::fs::canonicalize(&path).unwrap_or(path));

    let host = SystemHost {
        dry_run: args.dry_run,
    };
    let mut installer = ServiceInstaller::new(host, user, exe)
        .with_unit_dir(args.unit_dir)
        .with_config(config);
    installer.dry_run = args.dry_run;
    Ok(installer)
}

// ========== maintenance ==========

fn status(config: &PvPiConfig) -> ManagerResult<()> {
    let mut pvpi = connect(config)?;
    println!("Alive: {}", pvpi.get_alive()?);
    println!("MCU time: {}", pvpi.get_mcu_time()?);
    println!("System time: {}", Local::now().format("%y-%m-%d %H:%M:%S"));
    let state = pvpi.get_charge_state_code()?;
    println!("Charge state: {} ({})", state.index(), state);
    let faults = pvpi.get_fault_states()?;
    if faults.is_empty() {
        println!("Faults: none");
    } else {
        for fault in faults {
            println!("Fault: {}", fault);
        }
    }
    println!("{}", pvpi.read_telemetry()?);
    pvpi.close();
    Ok(())
}

fn set_mcu_time(config: &PvPiConfig) -> ManagerResult<()> {
    let mut pvpi = connect(config)?;
    println!("Alive: {}", pvpi.get_alive()?);
    pvpi.set_mcu_time(&Local::now().naive_local())?;
    println!("Current MCU time: {}", pvpi.get_mcu_time()?);
    pvpi.close();
    Ok(())
}

fn self_test(config: &PvPiConfig) -> ManagerResult<()> {
    let mut pvpi = connect(config)?;
    println!("Checking connection...");
    println!("Alive: {}", pvpi.get_alive()?);
    pvpi.set_mcu_time(&Local::now().naive_local())?;
    println!("Current MCU time: {}", pvpi.get_mcu_time()?);
    println!("System time: {}", Local::now().format("%y-%m-%d %H:%M:%S"));

    println!("Charge state code: {}", pvpi.get_charge_state_code()?.index());
    println!("Fault code: {}", pvpi.get_fault_code()?);
    println!("Charge state: {}", pvpi.get_charge_state()?);
    println!("Fault states: {:?}", pvpi.get_fault_states()?);

    let sample = pvpi.read_telemetry()?;
    println!("Battery: {} V, {} A", sample.battery_voltage, sample.battery_current);
    println!("PV: {} V, {} A", sample.pv_voltage, sample.pv_current);
    println!("PV PI Temp: {}C", sample.temperature);

    pvpi.set_mppt_state(SwitchState::On)?;
    println!("MPPT: ON");
    pvpi.set_ts_state(SwitchState::Off)?;
    println!("TS: OFF");
    pvpi.set_charge_state(SwitchState::On)?;
    println!("Charging: ON");
    pvpi.set_max_charge_current(10.0)?;
    println!("Max charge current: 10 A");
    pvpi.set_wakeup_voltage(13.0)?;
    println!("Wake-up voltage: 13 V");
    pvpi.close();
    Ok(())
}
