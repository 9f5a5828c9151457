//! MCollective request/reply plumbing.
//!
//! Two halves live here. The agent side ([`agent`], [`actions`]) runs on a
//! managed node: it reads one request file, routes the action through a
//! static table and always writes one reply file. The caller side
//! ([`caller`], [`vcs`]) runs on the management server and fans a request
//! out to nodes over `mco rpc`.

pub mod actions;
pub mod agent;
pub mod caller;
pub mod vcs;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REQUEST_FILE_ENV: &str = "MCOLLECTIVE_REQUEST_FILE";
pub const REPLY_FILE_ENV: &str = "MCOLLECTIVE_REPLY_FILE";

/// Canonical dispatcher result codes; also the agent process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok = 0,
    Aborted = 1,
    UnknownAction = 2,
    MissingData = 3,
    InvalidData = 4,
    UnknownError = 5,
}

impl RpcCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            RpcCode::Ok => "OK",
            RpcCode::Aborted => "RPCABORTED",
            RpcCode::UnknownAction => "UNKNOWNRPCACTION",
            RpcCode::MissingData => "MISSINGRPCDATA",
            RpcCode::InvalidData => "INVALIDRPCDATA",
            RpcCode::UnknownError => "UNKNOWNRPCERROR",
        }
    }
}

impl std::fmt::Display for RpcCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub callerid: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub uniqid: String,
    #[serde(default)]
    pub sender: String,
    pub action: String,
}

/// Reply envelope written by every agent action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    pub retcode: i32,
    #[serde(default)]
    pub out: String,
    #[serde(default)]
    pub err: String,
}

impl RpcReply {
    pub fn ok(out: impl Into<String>) -> Self {
        Self {
            retcode: 0,
            out: out.into(),
            err: String::new(),
        }
    }

    pub fn failed(retcode: i32, out: impl Into<String>, err: impl Into<String>) -> Self {
        Self {
            retcode,
            out: out.into(),
            err: err.into(),
        }
    }
}
