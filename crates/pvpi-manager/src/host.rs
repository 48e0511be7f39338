//! Host-side actions: setting the system clock and shutting down.

use std::process::Command;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::error::{ManagerError, ManagerResult};

/// Actions on the host the manager runs on.
pub trait HostControl {
    /// Set the system clock.
    fn set_system_time(&mut self, time: NaiveDateTime) -> ManagerResult<()>;

    /// Ask the operating system to shut down now.
    fn request_shutdown(&mut self) -> ManagerResult<()>;
}

/// The real host, driven through `sudo`.
#[derive(Debug, Default, Clone)]
pub struct SystemHost {
    /// Log the commands instead of running them.
    pub dry_run: bool,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn run(&self, program: &str, args: &[&str]) -> ManagerResult<()> {
        let command = format!("{} {}", program, args.join(" "));
        if self.dry_run {
            info!("Dry run: {}", command);
            return Ok(());
        }
        info!("Running {}", command);
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| ManagerError::HostCommand {
                command: command.clone(),
                detail: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            warn!("{} exited with {}", command, status);
            Err(ManagerError::HostCommand {
                command,
                detail: status.to_string(),
            })
        }
    }
}

impl HostControl for SystemHost {
    fn set_system_time(&mut self, time: NaiveDateTime) -> ManagerResult<()> {
        let stamp = time.format("%Y-%m-%d %H:%M:%S").to_string();
        self.run("sudo", &["date", "-s", &stamp])
    }

    fn request_shutdown(&mut self) -> ManagerResult<()> {
        self.run("sudo", &["shutdown", "now"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_runs_nothing() {
        let mut host = SystemHost { dry_run: true };
        host.request_shutdown().unwrap();
        host.set_system_time(NaiveDateTime::default()).unwrap();
    }

    #[test]
    fn test_missing_program_is_reported() {
        let host = SystemHost::new();
        let err = host.run("pvpi-no-such-program", &["x"]).unwrap_err();
        assert!(matches!(err, ManagerError::HostCommand { .. }));
    }
}
