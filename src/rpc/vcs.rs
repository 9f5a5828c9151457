//! Typed wrappers for the `enminst` and `vcs_cmd_api` agents as seen from
//! the management server.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::caller::{kwargs, Kwargs, RpcCaller, RpcError};

/// VCS error code for "system is already frozen".
pub const ALREADY_FROZEN: &str = "V-16-1-40206";

/// One `hasys -state` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemState {
    pub name: String,
    pub states: Vec<String>,
}

/// One `hagrp -state` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupState {
    pub group: String,
    pub system: String,
    pub states: Vec<String>,
}

impl GroupState {
    pub fn is_offline(&self) -> bool {
        !self.states.is_empty() && self.states.iter().all(|s| s == "OFFLINE")
    }
}

/// Parse the whitespace-aligned tables printed by `hasys -state` and
/// `hagrp -state`. Column names come from the first line with `#` removed.
pub fn parse_state_table(text: &str) -> Vec<BTreeMap<String, String>> {
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header
        .split_whitespace()
        .map(|h| h.replace('#', ""))
        .filter(|h| !h.is_empty())
        .collect();

    lines
        .map(str::split_whitespace)
        .map(|words| {
            headers
                .iter()
                .cloned()
                .zip(words.map(str::to_string))
                .collect::<BTreeMap<_, _>>()
        })
        .filter(|row| !row.is_empty())
        .collect()
}

/// `|OFFLINE|FAULTED|` → `["OFFLINE", "FAULTED"]`.
pub fn split_states(value: &str) -> Vec<String> {
    value
        .trim()
        .split('|')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn column(row: &BTreeMap<String, String>, name: &str) -> String {
    row.get(name).cloned().unwrap_or_default()
}

pub struct EnminstAgent<'a> {
    caller: &'a RpcCaller,
}

impl<'a> EnminstAgent<'a> {
    const AGENT: &'static str = "enminst";

    pub fn new(caller: &'a RpcCaller) -> Self {
        Self { caller }
    }

    pub fn hasys_state(&self, node: &str) -> Result<Vec<SystemState>, RpcError> {
        let out = self
            .caller
            .exec(node, Self::AGENT, "hasys_state", &Kwargs::new(), None)?;
        Ok(parse_state_table(&out)
            .iter()
            .map(|row| SystemState {
                name: column(row, "System"),
                states: split_states(&column(row, "Value")),
            })
            .collect())
    }

    pub fn hagrp_state(&self, node: &str) -> Result<Vec<GroupState>, RpcError> {
        let out = self
            .caller
            .exec(node, Self::AGENT, "hagrp_state", &Kwargs::new(), None)?;
        Ok(parse_state_table(&out)
            .iter()
            .map(|row| GroupState {
                group: column(row, "Group"),
                system: column(row, "System"),
                states: split_states(&column(row, "Value")),
            })
            .collect())
    }

    /// Persistent freezes need the cluster configuration writable, so they
    /// are bracketed by `haconf -makerw` and `haconf -dump -makero`. The
    /// read-only switch runs even when the freeze fails.
    pub fn hasys_freeze(&self, system: &str, persistent: bool, evacuate: bool) -> Result<(), RpcError> {
        let mut args = kwargs([("system", system.to_string())]);
        if evacuate {
            args.insert("evacuate".to_string(), "true".to_string());
        }

        if !persistent {
            return self
                .caller
                .exec(system, Self::AGENT, "hasys_freeze", &args, None)
                .map(drop);
        }

        args.insert("persistent".to_string(), "true".to_string());
        let vcs = VcsCmdApiAgent::new(self.caller);
        vcs.haconf(system, Haconf::MakeRw)?;
        let frozen = self.caller.exec(system, Self::AGENT, "hasys_freeze", &args, None);
        let read_only = vcs.haconf(system, Haconf::DumpMakeRo);
        frozen?;
        read_only
    }

    pub fn hasys_unfreeze(&self, system: &str, persistent: bool) -> Result<(), RpcError> {
        let mut args = kwargs([("system", system.to_string())]);
        if !persistent {
            return self
                .caller
                .exec(system, Self::AGENT, "hasys_unfreeze", &args, None)
                .map(drop);
        }

        args.insert("persistent".to_string(), "true".to_string());
        let vcs = VcsCmdApiAgent::new(self.caller);
        vcs.haconf(system, Haconf::MakeRw)?;
        let thawed = self.caller.exec(system, Self::AGENT, "hasys_unfreeze", &args, None);
        let read_only = vcs.haconf(system, Haconf::DumpMakeRo);
        thawed?;
        read_only
    }

    pub fn safe_shutdown(&self, node: &str) -> Result<String, RpcError> {
        info!(node, "requesting shutdown");
        self.caller
            .exec(node, Self::AGENT, "safe_shutdown", &Kwargs::new(), None)
            .map(|out| out.trim().to_string())
    }

    pub fn get_redundancy_level(&self, node: &str) -> Result<String, RpcError> {
        self.caller
            .exec(node, Self::AGENT, "get_redundancy_level", &Kwargs::new(), None)
    }
}

/// True when a freeze failed only because the system was frozen already.
pub fn is_already_frozen(err: &RpcError) -> bool {
    match err {
        RpcError::Agent { err, .. } => err.contains(ALREADY_FROZEN),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Haconf {
    MakeRw,
    DumpMakeRo,
}

impl Haconf {
    fn args(self) -> Kwargs {
        match self {
            Haconf::MakeRw => kwargs([
                ("haaction", "makerw".to_string()),
                ("read_only", "false".to_string()),
            ]),
            Haconf::DumpMakeRo => kwargs([
                ("haaction", "dump".to_string()),
                ("read_only", "true".to_string()),
            ]),
        }
    }
}

pub struct VcsCmdApiAgent<'a> {
    caller: &'a RpcCaller,
}

impl<'a> VcsCmdApiAgent<'a> {
    const AGENT: &'static str = "vcs_cmd_api";

    pub fn new(caller: &'a RpcCaller) -> Self {
        Self { caller }
    }

    pub fn haconf(&self, node: &str, mode: Haconf) -> Result<(), RpcError> {
        self.caller
            .exec(node, Self::AGENT, "haconf", &mode.args(), None)
            .map(drop)
            .inspect_err(|e| warn!(node, ?mode, error = %e, "haconf failed"))
    }

    /// LITP unlock: unfreeze the system and bring its groups back.
    pub fn unlock(&self, system: &str, nic_wait_timeout: u64) -> Result<(), RpcError> {
        info!(system, nic_wait_timeout, "unlocking system");
        let args = kwargs([
            ("sys", system.to_string()),
            ("nic_wait_timeout", nic_wait_timeout.to_string()),
        ]);
        self.caller
            .exec(system, Self::AGENT, "unlock", &args, None)
            .map(drop)
    }
}
