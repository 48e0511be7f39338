//! systemd units for the broker and the manager.
//!
//! The broker unit owns the serial port; the manager unit requires it and
//! starts after it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ManagerError, ManagerResult};
use crate::host::SystemHost;

/// Where unit files are installed by default.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// The units installed for a PV PI host, in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceUnit {
    Broker,
    Manager,
}

impl ServiceUnit {
    pub const ALL: [ServiceUnit; 2] = [ServiceUnit::Broker, ServiceUnit::Manager];

    pub fn file_name(self) -> &'static str {
        match self {
            ServiceUnit::Broker => "pvpi_uart.service",
            ServiceUnit::Manager => "pvpi_manager.service",
        }
    }

    /// The `pvpi` subcommand the unit runs.
    pub fn subcommand(self) -> &'static str {
        match self {
            ServiceUnit::Broker => "broker",
            ServiceUnit::Manager => "manager",
        }
    }

    /// Render the unit file text.
    pub fn render(self, user: &str, exec_start: &str) -> String {
        let (description, ordering, wanted_by) = match self {
            ServiceUnit::Broker => (
                "UART server for communication with the PV PI",
                "After=network-online.target\nWants=network-online.target\n",
                "default.target",
            ),
            ServiceUnit::Manager => (
                "PV PI Manager Service",
                "After=pvpi_uart.service\nRequires=pvpi_uart.service\n",
                "multi-user.target",
            ),
        };
        format!(
            "[Unit]\n\
             Description={description}\n\
             {ordering}\
             \n\
             [Service]\n\
             Type=simple\n\
             User={user}\n\
             Group={user}\n\
             ExecStart={exec_start}\n\
             Restart=always\n\
             RestartSec=10\n\
             \n\
             [Install]\n\
             WantedBy={wanted_by}\n"
        )
    }
}

/// Runs `systemctl` on behalf of the installer.
pub trait ServiceControl {
    fn systemctl(&mut self, args: &[&str]) -> ManagerResult<()>;
}

impl ServiceControl for SystemHost {
    fn systemctl(&mut self, args: &[&str]) -> ManagerResult<()> {
        let mut full = vec!["systemctl"];
        full.extend_from_slice(args);
        self.run("sudo", &full)
    }
}

/// Installs, removes and restarts the PV PI units.
#[derive(Debug)]
pub struct ServiceInstaller<S: ServiceControl> {
    control: S,
    unit_dir: PathBuf,
    user: String,
    exe: PathBuf,
    config: Option<PathBuf>,
    /// Log unit files instead of writing or removing them.
    pub dry_run: bool,
}

impl<S: ServiceControl> ServiceInstaller<S> {
    pub fn new(control: S, user: impl Into<String>, exe: impl Into<PathBuf>) -> Self {
        ServiceInstaller {
            control,
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            user: user.into(),
            exe: exe.into(),
            config: None,
            dry_run: false,
        }
    }

    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    /// Pass `--config <path>` to both services.
    pub fn with_config(mut self, path: Option<PathBuf>) -> Self {
        self.config = path;
        self
    }

    pub fn control(&self) -> &S {
        &self.control
    }

    pub fn unit_path(&self, unit: ServiceUnit) -> PathBuf {
        self.unit_dir.join(unit.file_name())
    }

    pub fn exec_start(&self, unit: ServiceUnit) -> String {
        let mut line = format!("{} {}", self.exe.display(), unit.subcommand());
        if let Some(config) = &self.config {
            line.push_str(&format!(" --config {}", config.display()));
        }
        line
    }

    /// Write both units, then enable and (re)start them.
    pub fn install(&mut self) -> ManagerResult<()> {
        info!("Installing services for user '{}'", self.user);
        if !self.dry_run {
            fs::create_dir_all(&self.unit_dir).map_err(|e| unit_error(&self.unit_dir, e))?;
        }
        for unit in ServiceUnit::ALL {
            let path = self.unit_path(unit);
            let text = unit.render(&self.user, &self.exec_start(unit));
            if self.dry_run {
                info!("Dry run: would write {}:\n{}", path.display(), text);
            } else {
                fs::write(&path, text).map_err(|e| unit_error(&path, e))?;
            }
        }

        self.control.systemctl(&["daemon-reload"])?;
        for unit in ServiceUnit::ALL {
            self.control.systemctl(&["enable", unit.file_name()])?;
            self.control.systemctl(&["restart", unit.file_name()])?;
            info!("{} installed and started", unit.file_name());
        }
        Ok(())
    }

    /// Disable both units and remove their files.
    pub fn uninstall(&mut self) -> ManagerResult<()> {
        for unit in ServiceUnit::ALL {
            self.control.systemctl(&["disable", unit.file_name()])?;
            let path = self.unit_path(unit);
            if self.dry_run {
                info!("Dry run: would remove {}", path.display());
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => info!("{} uninstalled", unit.file_name()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    info!("{} was not installed", path.display())
                }
                Err(e) => return Err(unit_error(&path, e)),
            }
        }
        self.control.systemctl(&["daemon-reload"])
    }

    pub fn restart(&mut self) -> ManagerResult<()> {
        for unit in ServiceUnit::ALL {
            self.control.systemctl(&["restart", unit.file_name()])?;
        }
        info!("Services restarted");
        Ok(())
    }
}

fn unit_error(path: &Path, source: std::io::Error) -> ManagerError {
    ManagerError::ServiceFile {
        path: path.to_path_buf(),
        source,
    }
}
