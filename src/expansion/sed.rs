//! Site Engineering Document access.
//!
//! The SED is a flat `key=value` file. Node-scoped keys follow
//! `<cluster>_node<N>_<attribute>` and group-scoped keys
//! `<group>_<attribute>`, so both families are looked up by prefix.

use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use super::error::ExpansionError;

const DNS_DOMAIN_NAME: &str = "dns_domainName";

/// Immutable key/value view of one SED file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sed {
    entries: BTreeMap<String, String>,
}

/// Login details of one enclosure's pair of OAs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosureConfig {
    pub id: String,
    pub oa_ip1: String,
    pub oa_ip2: String,
    pub username: String,
    pub password: String,
}

/// The SED attributes of one peer node the expansion needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub sed_name: String,
    pub ilo_ip: Ipv4Addr,
    pub serial: String,
}

impl NodeEntry {
    /// Credential-store key holding this node's iLO password.
    pub fn ilo_key(&self) -> String {
        format!("key-for-{}_ilo", self.sed_name)
    }
}

impl Sed {
    pub fn load(path: &Path) -> Result<Self, ExpansionError> {
        let text = fs::read_to_string(path).map_err(|e| ExpansionError::io(path, e))?;
        Self::parse(&text)
    }

    /// Blank lines and `#` comments are skipped, each line splits on its
    /// first `=`, and an empty value counts as absent. A key defined twice
    /// is rejected.
    pub fn parse(text: &str) -> Result<Self, ExpansionError> {
        let mut entries = BTreeMap::new();
        let mut seen = BTreeMap::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ExpansionError::validation(format!(
                    "SED line {} is not key=value: '{line}'",
                    index + 1
                )));
            };
            let key = key.trim();
            if let Some(first) = seen.insert(key.to_string(), index + 1) {
                return Err(ExpansionError::validation(format!(
                    "SED key {key} is defined on line {first} and again on line {}",
                    index + 1
                )));
            }
            let value = value.trim();
            if !value.is_empty() {
                entries.insert(key.to_string(), value.to_string());
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ExpansionError> {
        self.get(key)
            .ok_or_else(|| ExpansionError::validation(format!("no value for {key} in the SED")))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    /// How many keys carry exactly `value`.
    pub fn count_value(&self, value: &str) -> usize {
        self.values().filter(|v| *v == value).count()
    }

    /// First key, in key order, whose value is `value`.
    pub fn key_for_value(&self, value: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, v)| v.as_str() == value)
            .map(|(k, _)| k.as_str())
    }

    /// Every `<prefix>_<attribute>` entry, keyed by attribute.
    pub fn node_config(&self, prefix: &str) -> BTreeMap<String, String> {
        let prefix = format!("{prefix}_");
        self.entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|attribute| (attribute.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn node(&self, system: &str) -> Result<NodeEntry, ExpansionError> {
        let sed_name = node_key(system)?;
        let config = self.node_config(&sed_name);
        if config.is_empty() {
            return Err(ExpansionError::validation(format!(
                "no SED entries for {system} ({sed_name}_*)"
            )));
        }
        let ilo = config.get("ilo_IP").ok_or_else(|| {
            ExpansionError::validation(format!("no iLO IP in the SED for {system}"))
        })?;
        let ilo_ip = ilo.parse().map_err(|_| {
            ExpansionError::validation(format!("{system} iLO IP {ilo} is not a valid IPv4 address"))
        })?;
        let serial = config.get("serial").ok_or_else(|| {
            ExpansionError::validation(format!("no serial number in the SED for {system}"))
        })?;
        Ok(NodeEntry {
            sed_name,
            ilo_ip,
            serial: serial.clone(),
        })
    }

    pub fn enclosure(&self, id: &str) -> Result<EnclosureConfig, ExpansionError> {
        let config = self.node_config(id);
        let field = |name: &str| {
            config.get(name).cloned().ok_or_else(|| {
                ExpansionError::validation(format!("no {id}_{name} in the SED"))
            })
        };
        let enclosure = EnclosureConfig {
            id: id.to_string(),
            oa_ip1: field("OAIP1")?,
            oa_ip2: field("OAIP2")?,
            username: field("username")?,
            password: field("password")?,
        };
        for ip in [&enclosure.oa_ip1, &enclosure.oa_ip2] {
            if ip.parse::<Ipv4Addr>().is_err() {
                return Err(ExpansionError::validation(format!(
                    "{id} OA address {ip} is not a valid IPv4 address"
                )));
            }
        }
        Ok(enclosure)
    }

    pub fn domain(&self) -> Result<&str, ExpansionError> {
        self.require(DNS_DOMAIN_NAME)
    }
}

/// `db-1` → `db_node1`.
pub fn node_key(system: &str) -> Result<String, ExpansionError> {
    match system.rsplit_once('-') {
        Some((cluster, number))
            if !cluster.is_empty() && number.chars().all(|c| c.is_ascii_digit()) && !number.is_empty() =>
        {
            Ok(format!("{cluster}_node{number}"))
        }
        _ => Err(ExpansionError::validation(format!(
            "system name {system} is not of the form <cluster>-<number>"
        ))),
    }
}
