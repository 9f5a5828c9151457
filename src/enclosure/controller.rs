use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::command::OaCommand;
use super::error::OaError;
use super::parse::{self, OaNetwork, Serial, ServerBay};
use super::transport::OaTransport;
use crate::wait::{Poll, Waiter};

/// EBIPA settings for one device bay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbipaEntry {
    pub bay: u32,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub domain: String,
}

/// Driver for the pair of Onboard Administrators in one enclosure.
///
/// Every command goes to the Active OA, resolved on first use and then
/// cached for the lifetime of the controller.
pub struct OnboardAdministrator {
    enclosure: String,
    primary: String,
    secondary: String,
    transport: Box<dyn OaTransport>,
    active: RefCell<Option<String>>,
}

impl OnboardAdministrator {
    pub fn new(
        enclosure: impl Into<String>,
        primary: impl Into<String>,
        secondary: impl Into<String>,
        transport: Box<dyn OaTransport>,
    ) -> Self {
        Self {
            enclosure: enclosure.into(),
            primary: primary.into(),
            secondary: secondary.into(),
            transport,
            active: RefCell::new(None),
        }
    }

    pub fn enclosure(&self) -> &str {
        &self.enclosure
    }

    fn reports_active(&self, host: &str) -> bool {
        match self.transport.send(host, &OaCommand::ShowOaStatus) {
            Ok(status) => parse::is_active(&status),
            Err(e) => {
                warn!(enclosure = %self.enclosure, host, error = %e, "OA status query failed");
                false
            }
        }
    }

    /// Address of the Active OA. The primary is asked first; if it is not
    /// Active the secondary is asked exactly once.
    pub fn active(&self) -> Result<String, OaError> {
        if let Some(host) = self.active.borrow().as_ref() {
            return Ok(host.clone());
        }

        let host = if self.reports_active(&self.primary) {
            self.primary.clone()
        } else {
            info!(
                enclosure = %self.enclosure,
                primary = %self.primary,
                secondary = %self.secondary,
                "primary OA is not active, switching to secondary"
            );
            if !self.reports_active(&self.secondary) {
                return Err(OaError::NoActiveOa {
                    primary: self.primary.clone(),
                    secondary: self.secondary.clone(),
                });
            }
            self.secondary.clone()
        };

        info!(enclosure = %self.enclosure, host = %host, "active OA");
        *self.active.borrow_mut() = Some(host.clone());
        Ok(host)
    }

    pub fn send(&self, command: &OaCommand) -> Result<String, OaError> {
        let host = self.active()?;
        self.transport.send(&host, command)
    }

    pub fn server_names_raw(&self) -> Result<String, OaError> {
        self.send(&OaCommand::ShowServerNames)
    }

    pub fn server_names(&self) -> Result<Vec<ServerBay>, OaError> {
        parse::server_names(&self.server_names_raw()?)
    }

    pub fn bay_serials(&self) -> Result<BTreeMap<u32, Serial>, OaError> {
        parse::bay_serials(&self.server_names_raw()?)
    }

    /// Bay currently holding the blade with `serial`, if any.
    pub fn find_serial(&self, serial: &str) -> Result<Option<u32>, OaError> {
        Ok(self
            .bay_serials()?
            .into_iter()
            .find(|(_, s)| s.is(serial))
            .map(|(bay, _)| bay))
    }

    pub fn server_list(&self) -> Result<BTreeMap<u32, Ipv4Addr>, OaError> {
        Ok(parse::server_list(&self.send(&OaCommand::ShowServerList)?))
    }

    pub fn ebipa_servers(&self) -> Result<BTreeMap<String, u32>, OaError> {
        Ok(parse::ebipa_servers(&self.send(&OaCommand::ShowEbipaServer)?))
    }

    pub fn network(&self) -> Result<OaNetwork, OaError> {
        parse::oa_network(&self.send(&OaCommand::ShowOaNetwork)?)
    }

    /// Address, gateway and domain for one bay, then enable it. Nothing is
    /// persisted until [`Self::save_ebipa`].
    pub fn set_ebipa(&self, entry: &EbipaEntry) -> Result<(), OaError> {
        info!(enclosure = %self.enclosure, bay = entry.bay, ip = %entry.ip, "setting EBIPA");
        self.send(&OaCommand::SetEbipaServer {
            ip: entry.ip.clone(),
            netmask: entry.netmask.clone(),
            bay: entry.bay,
        })?;
        self.send(&OaCommand::SetEbipaGateway {
            gateway: entry.gateway.clone(),
            bay: entry.bay,
        })?;
        if !entry.domain.is_empty() {
            self.send(&OaCommand::SetEbipaDomain {
                domain: entry.domain.clone(),
                bay: entry.bay,
            })?;
        }
        self.send(&OaCommand::EnableEbipaServer { bay: entry.bay })?;
        Ok(())
    }

    /// Disable a bay's EBIPA entry and blank its address and gateway.
    pub fn clear_ebipa(&self, bay: u32) -> Result<(), OaError> {
        info!(enclosure = %self.enclosure, bay, "clearing EBIPA");
        self.send(&OaCommand::DisableEbipaServer { bay })?;
        self.send(&OaCommand::ClearEbipaServer { bay })?;
        self.send(&OaCommand::ClearEbipaGateway { bay })?;
        Ok(())
    }

    pub fn save_ebipa(&self) -> Result<(), OaError> {
        info!(enclosure = %self.enclosure, "saving EBIPA");
        self.send(&OaCommand::SaveEbipa).map(drop)
    }

    pub fn power_on(&self, bay: u32) -> Result<(), OaError> {
        info!(enclosure = %self.enclosure, bay, "powering on");
        self.send(&OaCommand::PowerOnServer { bay }).map(drop)
    }

    pub fn reset(&self, bay: u32) -> Result<(), OaError> {
        warn!(enclosure = %self.enclosure, bay, "resetting server");
        self.send(&OaCommand::ResetServer { bay }).map(drop)
    }

    /// Wait until `SHOW SERVER NAMES` reports `serial` in `bay`.
    pub fn wait_for_serial(
        &self,
        waiter: &Waiter<'_>,
        bay: u32,
        serial: &str,
        timeout: Duration,
    ) -> Result<(), OaError> {
        let what = format!("serial {serial} in bay {bay} of {}", self.enclosure);
        waiter.until(&what, timeout, || {
            let serials = self.bay_serials()?;
            Ok(match serials.get(&bay) {
                Some(s) if s.is(serial) => Poll::Ready(()),
                Some(s) => Poll::Pending(s.to_string()),
                None => Poll::Pending("[Absent]".to_string()),
            })
        })
    }

    /// Wait until none of `bays` reports an `[Unknown]` serial.
    pub fn wait_for_known_serials(
        &self,
        waiter: &Waiter<'_>,
        bays: &[u32],
        timeout: Duration,
    ) -> Result<BTreeMap<u32, Serial>, OaError> {
        let what = format!("serial numbers on {}", self.enclosure);
        waiter.until(&what, timeout, || {
            let serials = self.bay_serials()?;
            let unknown: Vec<String> = bays
                .iter()
                .filter(|bay| matches!(serials.get(bay), Some(Serial::Unknown)))
                .map(|bay| format!("bay {bay} [Unknown]"))
                .collect();
            if unknown.is_empty() {
                Ok(Poll::Ready(serials))
            } else {
                debug!(enclosure = %self.enclosure, ?unknown, "serials not yet known");
                Ok(Poll::Pending(unknown.join(", ")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::wait::WaitError;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    /// Answers by command text; records `(host, command)` pairs.
    #[derive(Default)]
    struct Scripted {
        status: BTreeMap<String, String>,
        names: RefCell<Vec<String>>,
        calls: RefCell<Vec<(String, String)>>,
    }

    impl OaTransport for Rc<Scripted> {
        fn send(&self, host: &str, command: &OaCommand) -> Result<String, OaError> {
            self.calls
                .borrow_mut()
                .push((host.to_string(), command.to_string()));
            Ok(match command {
                OaCommand::ShowOaStatus => self.status.get(host).cloned().unwrap_or_default(),
                OaCommand::ShowServerNames => {
                    let mut names = self.names.borrow_mut();
                    if names.len() > 1 {
                        names.remove(0)
                    } else {
                        names.first().cloned().unwrap_or_default()
                    }
                }
                _ => String::new(),
            })
        }
    }

    fn names(serial: &str) -> String {
        format!("  5 Server Blade                 {serial}     OK       On      Off")
    }

    fn oa(script: Scripted) -> (OnboardAdministrator, Rc<Scripted>) {
        let script = Rc::new(script);
        let oa = OnboardAdministrator::new(
            "enclosure2",
            "10.36.49.20",
            "10.36.49.21",
            Box::new(script.clone()),
        );
        (oa, script)
    }

    fn standby_primary() -> Scripted {
        Scripted {
            status: BTreeMap::from([
                ("10.36.49.20".to_string(), "Role: Standby".to_string()),
                ("10.36.49.21".to_string(), "Role: Active".to_string()),
            ]),
            ..Scripted::default()
        }
    }

    #[test]
    fn standby_primary_fails_over_to_secondary_once() {
        let (oa, script) = oa(standby_primary());

        oa.power_on(5).unwrap();
        oa.save_ebipa().unwrap();

        assert_eq!(
            *script.calls.borrow(),
            vec![
                ("10.36.49.20".to_string(), "SHOW OA STATUS".to_string()),
                ("10.36.49.21".to_string(), "SHOW OA STATUS".to_string()),
                ("10.36.49.21".to_string(), "POWERON SERVER 5".to_string()),
                ("10.36.49.21".to_string(), "SAVE EBIPA".to_string()),
            ]
        );
    }

    #[test]
    fn neither_oa_active_is_an_error() {
        let (oa, script) = oa(Scripted::default());

        let err = oa.power_on(5).unwrap_err();

        assert!(matches!(err, OaError::NoActiveOa { .. }));
        assert_eq!(script.calls.borrow().len(), 2);
    }

    #[test]
    fn ebipa_sequence_for_one_bay() {
        let (oa, script) = oa(standby_primary());

        oa.set_ebipa(&EbipaEntry {
            bay: 5,
            ip: "10.36.49.170".into(),
            netmask: "255.255.255.0".into(),
            gateway: "10.36.49.1".into(),
            domain: "athtem.eei.ericsson.se".into(),
        })
        .unwrap();

        let sent: Vec<String> = script.calls.borrow()[2..]
            .iter()
            .map(|(_, c)| c.clone())
            .collect();
        assert_eq!(
            sent,
            vec![
                "SET EBIPA SERVER 10.36.49.170 255.255.255.0 5",
                "SET EBIPA SERVER GATEWAY 10.36.49.1 5",
                "SET EBIPA SERVER DOMAIN athtem.eei.ericsson.se 5",
                "ENABLE EBIPA SERVER 5",
            ]
        );
    }

    #[test]
    fn serial_wait_converges() {
        let script = standby_primary();
        *script.names.borrow_mut() = vec![names("[Unknown]"), names("[Unknown]"), names("CZ3328JJT6")];
        let (oa, _) = oa(script);
        let clock = ManualClock::new();
        let waiter = Waiter::new(&clock, Duration::from_secs(30));

        oa.wait_for_serial(&waiter, 5, "CZ3328JJT6", Duration::from_secs(600))
            .unwrap();

        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn serial_wait_times_out_with_last_observation() {
        let script = standby_primary();
        *script.names.borrow_mut() = vec![names("[Unknown]")];
        let (oa, _) = oa(script);
        let clock = ManualClock::new();
        let waiter = Waiter::new(&clock, Duration::from_secs(30));

        let err = oa
            .wait_for_serial(&waiter, 5, "CZ3328JJT6", Duration::from_secs(600))
            .unwrap_err();

        match err {
            OaError::Wait(WaitError::Timeout { seconds, last, .. }) => {
                assert_eq!(seconds, 600);
                assert_eq!(last, "[Unknown]");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
