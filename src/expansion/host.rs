//! The management server the expansion runs on: reachability checks, ARP
//! and file attribute housekeeping, and the hardware-comm hand-off.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::ExpansionError;
use crate::shell::{CommandRunner, Shell};

pub trait ManagementHost {
    /// One ICMP echo; true if it was answered.
    fn ping(&self, address: &str) -> bool;

    fn clear_arp(&self, address: &str) -> Result<(), ExpansionError>;

    fn set_immutable(&self, path: &Path, immutable: bool) -> Result<(), ExpansionError>;

    fn hw_comm_installed(&self) -> bool;

    /// `hw_comm.sh -y <component> <sed>`; returns stdout.
    fn hw_comm(&self, component: &str, sed: &Path) -> Result<String, ExpansionError>;
}

pub struct LocalHost {
    runner: Box<dyn CommandRunner>,
    hw_comm: PathBuf,
}

impl LocalHost {
    pub fn new(hw_comm: impl Into<PathBuf>) -> Self {
        Self::with_runner(hw_comm, Box::new(Shell))
    }

    pub fn with_runner(hw_comm: impl Into<PathBuf>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            runner,
            hw_comm: hw_comm.into(),
        }
    }

    fn checked(&self, argv: &[&str]) -> Result<String, ExpansionError> {
        let command = argv.join(" ");
        let output = self.runner.run(argv).map_err(|e| ExpansionError::Host {
            command: command.clone(),
            reason: e.to_string(),
        })?;
        if !output.success() {
            return Err(ExpansionError::Host {
                command,
                reason: format!("exit {}: {}", output.status, output.stderr),
            });
        }
        Ok(output.stdout)
    }
}

impl ManagementHost for LocalHost {
    fn ping(&self, address: &str) -> bool {
        let reachable = self
            .runner
            .run(&["ping", "-c", "1", address])
            .map(|o| o.success())
            .unwrap_or(false);
        debug!(address, reachable, "ping");
        reachable
    }

    fn clear_arp(&self, address: &str) -> Result<(), ExpansionError> {
        self.checked(&["arp", "-d", address]).map(drop)
    }

    fn set_immutable(&self, path: &Path, immutable: bool) -> Result<(), ExpansionError> {
        let flag = if immutable { "+i" } else { "-i" };
        let path = path.to_string_lossy();
        self.checked(&["chattr", flag, path.as_ref()]).map(drop)
    }

    fn hw_comm_installed(&self) -> bool {
        self.hw_comm.exists()
    }

    fn hw_comm(&self, component: &str, sed: &Path) -> Result<String, ExpansionError> {
        let script = self.hw_comm.to_string_lossy();
        let sed = sed.to_string_lossy();
        info!(component, "running hw_comm, this may take several minutes");
        self.checked(&[script.as_ref(), "-y", component, sed.as_ref()])
    }
}
