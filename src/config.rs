//! Layered settings: built-in defaults, then the YAML file, then
//! `ENMINST_*` environment variables (`__` separates nested keys, e.g.
//! `ENMINST_TIMEOUTS__SERIAL=900`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/opt/ericsson/enminst/etc/enminst.yaml";

const MODEL_FILE: &str = "expansion_model.json";
const PROGRESS_FILE: &str = "expansion_progress.json";
const REPORT_FILE: &str = "enclosure_report.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runtime_dir: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
    pub hw_comm: PathBuf,
    pub litp: LitpSettings,
    pub mco: McoSettings,
    pub ssh: SshSettings,
    pub timeouts: Timeouts,
    pub sleeps: Sleeps,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/opt/ericsson/enminst/runtime"),
            log_file: PathBuf::from("/opt/ericsson/enminst/log/cmd.log"),
            log_level: "info".to_string(),
            hw_comm: PathBuf::from("/opt/ericsson/hw_comm/bin/hw_comm.sh"),
            litp: LitpSettings::default(),
            mco: McoSettings::default(),
            ssh: SshSettings::default(),
            timeouts: Timeouts::default(),
            sleeps: Sleeps::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LitpSettings {
    pub url: String,
    /// `~/.litprc` when unset.
    pub litprc: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: u64,
    pub read_attempts: u32,
    pub read_retry_delay: u64,
    pub plan_poll_attempts: u32,
    pub plan_poll_delay: u64,
}

impl Default for LitpSettings {
    fn default() -> Self {
        Self {
            url: "https://localhost:9999/litp/rest/v1".to_string(),
            litprc: None,
            username: None,
            password: None,
            request_timeout: 60,
            read_attempts: 3,
            read_retry_delay: 5,
            plan_poll_attempts: 20,
            plan_poll_delay: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McoSettings {
    pub binary: String,
    pub timeout: u64,
    pub retries: u32,
}

impl Default for McoSettings {
    fn default() -> Self {
        Self {
            binary: "/usr/bin/mco".to_string(),
            timeout: 120,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub binary: String,
    pub sshpass: String,
    pub attempts: u32,
    pub control_dir: PathBuf,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: "/usr/bin/ssh".to_string(),
            sshpass: "/usr/bin/sshpass".to_string(),
            attempts: 3,
            control_dir: std::env::temp_dir(),
        }
    }
}

/// Upper bounds, in seconds, for every wait in the expansion workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub shutdown: u64,
    pub ping: u64,
    pub serial: u64,
    pub vcs: u64,
    pub service_offline: u64,
    /// NIC wait handed to `vcs_cmd_api unlock`.
    pub unlock: u64,
    pub poll_interval: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            shutdown: 600,
            ping: 1800,
            serial: 600,
            vcs: 600,
            service_offline: 600,
            unlock: 300,
            poll_interval: 30,
        }
    }
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// Fixed settle times, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sleeps {
    pub post_ilo: u64,
    pub boot_blade: u64,
    pub unlock_next_node: u64,
}

impl Default for Sleeps {
    fn default() -> Self {
        Self {
            post_ilo: 180,
            boot_blade: 300,
            unlock_next_node: 300,
        }
    }
}

impl Settings {
    /// Load settings. A missing file is not an error; the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ENMINST_").split("__"))
            .extract()
            .with_context(|| format!("loading settings from {}", path.display()))
    }

    pub fn model_path(&self) -> PathBuf {
        self.runtime_dir.join(MODEL_FILE)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.runtime_dir.join(PROGRESS_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.runtime_dir.join(REPORT_FILE)
    }

    pub fn litprc_path(&self) -> Option<PathBuf> {
        self.litp
            .litprc
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".litprc")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_timeouts() {
        let settings = Settings::default();
        assert_eq!(settings.timeouts.shutdown, 600);
        assert_eq!(settings.timeouts.ping, 1800);
        assert_eq!(settings.timeouts.serial, 600);
        assert_eq!(settings.timeouts.poll_interval(), Duration::from_secs(30));
        assert_eq!(
            settings.model_path(),
            PathBuf::from("/opt/ericsson/enminst/runtime/expansion_model.json")
        );
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enminst.yaml");
        std::fs::write(
            &path,
            "runtime_dir: /tmp/rt\ntimeouts:\n  serial: 900\nlitp:\n  plan_poll_attempts: 5\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.runtime_dir, PathBuf::from("/tmp/rt"));
        assert_eq!(settings.timeouts.serial, 900);
        assert_eq!(settings.timeouts.ping, 1800);
        assert_eq!(settings.litp.plan_poll_attempts, 5);
        assert_eq!(settings.report_path(), PathBuf::from("/tmp/rt/enclosure_report.txt"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/enminst.yaml"))).unwrap();
        assert_eq!(settings.litp.url, "https://localhost:9999/litp/rest/v1");
    }
}
