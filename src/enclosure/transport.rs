//! SSH transport to an Onboard Administrator.
//!
//! The OA CLI is reached with one `ssh` invocation per command. Every
//! invocation for a host shares a multiplexed master connection, so the
//! controller sees one session per OA; the master is closed when the
//! transport is dropped. The password travels in `SSHPASS`, never on the
//! command line.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::command::OaCommand;
use super::error::OaError;
use crate::config::SshSettings;
use crate::shell::{CommandRunner, Shell};

/// Sends one OA command to one OA address and returns its output.
pub trait OaTransport {
    fn send(&self, host: &str, command: &OaCommand) -> Result<String, OaError>;
}

pub struct SshTransport {
    user: String,
    password: String,
    settings: SshSettings,
    runner: Box<dyn CommandRunner>,
    opened: RefCell<BTreeSet<String>>,
}

impl SshTransport {
    pub fn new(user: impl Into<String>, password: impl Into<String>, settings: SshSettings) -> Self {
        Self::with_runner(user, password, settings, Box::new(Shell))
    }

    pub fn with_runner(
        user: impl Into<String>,
        password: impl Into<String>,
        settings: SshSettings,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            settings,
            runner,
            opened: RefCell::new(BTreeSet::new()),
        }
    }

    fn control_path(&self) -> PathBuf {
        self.settings
            .control_dir
            .join(format!("enminst-oa-{}-%r@%h:%p", std::process::id()))
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    fn argv(&self, host: &str, command: &OaCommand) -> Vec<String> {
        let control = self.control_path();
        vec![
            self.settings.sshpass.clone(),
            "-e".to_string(),
            self.settings.binary.clone(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control.display()),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
            self.target(host),
            command.to_string(),
        ]
    }
}

impl OaTransport for SshTransport {
    fn send(&self, host: &str, command: &OaCommand) -> Result<String, OaError> {
        let argv = self.argv(host, command);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        let env = [("SSHPASS", self.password.as_str())];
        let attempts = self.settings.attempts.max(1);

        info!(host, command = %command, "running OA command");
        let mut attempt = 1;
        let output = loop {
            match self.runner.execute(&argv, &env, None) {
                Ok(output) => break output,
                Err(e) if attempt < attempts => {
                    warn!(host, command = %command, attempt, error = %e, "OA command failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(OaError::Io {
                        host: host.to_string(),
                        source: e,
                    })
                }
            }
        };
        self.opened.borrow_mut().insert(host.to_string());

        if !output.success() || !output.stderr.trim().is_empty() {
            let reason = if output.stderr.trim().is_empty() {
                format!("exit status {}", output.status)
            } else {
                output.stderr.trim().to_string()
            };
            return Err(OaError::Command {
                host: host.to_string(),
                command: command.to_string(),
                reason,
            });
        }

        debug!(host, command = %command, output = %output.stdout, "OA output");
        Ok(output.stdout)
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        let control = format!("ControlPath={}", self.control_path().display());
        for host in self.opened.borrow().iter() {
            let target = self.target(host);
            let argv = [
                self.settings.binary.as_str(),
                "-o",
                control.as_str(),
                "-O",
                "exit",
                target.as_str(),
            ];
            if let Err(e) = self.runner.run(&argv) {
                debug!(host = %host, error = %e, "closing OA session failed");
            }
        }
    }
}
