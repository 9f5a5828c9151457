//! Parsers for the fixed-layout tables the OA prints.
//!
//! Table rows start with a bay number; headers, rules and totals do not, so
//! "first word is a number" selects data rows. Fields are counted from the
//! end of the row because the server name column may contain spaces.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use super::command::OaCommand;
use super::error::OaError;

const ABSENT: &str = "[Absent]";
const UNKNOWN_SERIAL: &str = "[Unknown]";
const ACTIVE_ROLE: &str = "Role:Active";

/// A serial number as the OA reports it. A blade whose iLO has not yet
/// been given an address shows `[Unknown]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Serial {
    Known(String),
    Unknown,
}

impl Serial {
    pub fn parse(word: &str) -> Self {
        if word == UNKNOWN_SERIAL {
            Serial::Unknown
        } else {
            Serial::Known(word.to_string())
        }
    }

    pub fn is(&self, serial: &str) -> bool {
        matches!(self, Serial::Known(s) if s == serial)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serial::Known(s) => f.write_str(s),
            Serial::Unknown => f.write_str(UNKNOWN_SERIAL),
        }
    }
}

/// One populated bay from `SHOW SERVER NAMES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBay {
    pub bay: u32,
    pub name: String,
    pub serial: Serial,
    pub status: String,
    pub power: String,
}

impl ServerBay {
    pub fn is_powered_on(&self) -> bool {
        self.power.eq_ignore_ascii_case("on")
    }
}

fn bay_number(word: &str) -> Option<u32> {
    if word.chars().all(|c| c.is_ascii_digit()) {
        word.parse().ok()
    } else {
        None
    }
}

/// `SHOW SERVER NAMES`: `[Absent]` bays are left out.
pub fn server_names(output: &str) -> Result<Vec<ServerBay>, OaError> {
    let mut bays = Vec::new();
    for line in output.lines() {
        if line.contains(ABSENT) {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(bay) = words.first().and_then(|w| bay_number(w)) else {
            continue;
        };
        let n = words.len();
        if n < 5 {
            return Err(OaError::parse(
                OaCommand::ShowServerNames,
                format!("bay {bay} row has {n} fields: '{}'", line.trim()),
            ));
        }
        bays.push(ServerBay {
            bay,
            name: words[1..n - 4].join(" "),
            serial: Serial::parse(words[n - 4]),
            status: words[n - 3].to_string(),
            power: words[n - 2].to_string(),
        });
    }
    Ok(bays)
}

/// Bay → serial view of `SHOW SERVER NAMES`.
pub fn bay_serials(output: &str) -> Result<BTreeMap<u32, Serial>, OaError> {
    Ok(server_names(output)?
        .into_iter()
        .map(|b| (b.bay, b.serial))
        .collect())
}

/// `SHOW SERVER LIST`: bay → iLO address for bays whose iLO has one.
pub fn server_list(output: &str) -> BTreeMap<u32, Ipv4Addr> {
    output
        .lines()
        .filter(|line| !line.contains(ABSENT))
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let bay = bay_number(words.first()?)?;
            let ip = words.len().checked_sub(4).and_then(|i| words[i].parse().ok())?;
            Some((bay, ip))
        })
        .collect()
}

/// `SHOW EBIPA SERVER`: iLO address → bay for the enabled device bays.
/// Interconnect rows (`1A`) and disabled bays are skipped.
pub fn ebipa_servers(output: &str) -> BTreeMap<String, u32> {
    output
        .lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let bay = bay_number(words.first()?)?;
            if words.get(1) != Some(&"Yes") {
                return None;
            }
            let ip = words.get(2)?;
            ip.parse::<Ipv4Addr>().ok()?;
            Some((ip.to_string(), bay))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaNetwork {
    pub netmask: String,
    pub gateway: String,
}

/// `SHOW OA NETWORK`: the `Netmask:` and `Gateway Address:` lines.
pub fn oa_network(output: &str) -> Result<OaNetwork, OaError> {
    let mut netmask = None;
    let mut gateway = None;
    for line in output.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["Netmask:", value, ..] => netmask = Some(value.to_string()),
            ["Gateway", "Address:", value, ..] => gateway = Some(value.to_string()),
            _ => {}
        }
    }
    match (netmask, gateway) {
        (Some(netmask), Some(gateway)) => Ok(OaNetwork { netmask, gateway }),
        (None, _) => Err(OaError::parse(OaCommand::ShowOaNetwork, "no Netmask line")),
        (_, None) => Err(OaError::parse(OaCommand::ShowOaNetwork, "no Gateway Address line")),
    }
}

/// True when `SHOW OA STATUS` reports this OA as the active one.
pub fn is_active(status: &str) -> bool {
    status.replace(' ', "").contains(ACTIVE_ROLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVER_NAMES: &str = "\
Bay Server Name                                       Serial Number   Status   Power   UID Partner
--- ------------------------------------------------- --------------- -------- ------- --- -------
  1 ieatrcxb3184                                      CZ3328JJT6      OK       On      Off
  2 ProLiant BL460c Gen9                              CZ3328JJT7      OK       Off     Off
  3 [Absent]
  5 Server Blade                                      [Unknown]       Other    Off     Off
Totals: 3 server blades installed, 1 powered on.";

    #[test]
    fn server_names_skip_absent_and_keep_unknown_serial() {
        let bays = server_names(SERVER_NAMES).unwrap();
        assert_eq!(bays.len(), 3);
        assert_eq!(bays[0].serial, Serial::Known("CZ3328JJT6".into()));
        assert!(bays[0].is_powered_on());
        assert_eq!(bays[1].name, "ProLiant BL460c Gen9");
        assert_eq!(bays[1].power, "Off");
        assert_eq!(bays[2].bay, 5);
        assert_eq!(bays[2].serial, Serial::Unknown);
    }

    #[test]
    fn short_bay_row_is_a_parse_error() {
        let err = server_names("  4 broken row").unwrap_err();
        assert!(matches!(err, OaError::Parse { .. }));
    }

    #[test]
    fn server_list_reads_ilo_address() {
        let output = "\
Bay iLO Name                      iLO IP Address  Status   Power   UID Partner
--- ----------------------------- --------------- -------- ------- --- -------
  1 ILOCZ3328JJT6                 10.36.49.99     OK       On      Off
  2 ILOCZ3328JJT7                 [Unknown]       OK       Off     Off
  3 [Absent]";
        let list = server_list(output);
        assert_eq!(list.len(), 1);
        assert_eq!(list[&1], "10.36.49.99".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn ebipa_maps_enabled_device_bays_only() {
        let output = "\
EBIPA Device Server Settings
Bay Enabled EBIPA/Current   Netmask         Gateway         DNS             Domain
--- ------- --------------- --------------- --------------- --------------- ------
  1     Yes 10.36.49.99     255.255.255.0   10.36.49.1      10.36.0.10      athtem.eei.ericsson.se
 1A      No
  2      No 10.36.49.100    255.255.255.0   10.36.49.1
  5     Yes 10.36.49.170    255.255.255.0   10.36.49.1";
        let table = ebipa_servers(output);
        assert_eq!(table.len(), 2);
        assert_eq!(table["10.36.49.99"], 1);
        assert_eq!(table["10.36.49.170"], 5);
    }

    #[test]
    fn network_reads_netmask_and_gateway() {
        let output = "\
Onboard Administrator #1 Network Information:
        Dynamic DNS: Disabled
        IPv4 Settings:
        DHCP: Disabled
        IPv4 Address: 10.36.49.20
        Netmask: 255.255.255.0
        Gateway Address: 10.36.49.1";
        let network = oa_network(output).unwrap();
        assert_eq!(
            network,
            OaNetwork {
                netmask: "255.255.255.0".into(),
                gateway: "10.36.49.1".into()
            }
        );
        assert!(oa_network("Netmask: 255.255.255.0").is_err());
    }

    #[test]
    fn active_role_ignores_spacing() {
        assert!(is_active("Onboard Administrator #1 Status:\n  Role:   Active\n"));
        assert!(!is_active("  Role:   Standby\n"));
    }
}
