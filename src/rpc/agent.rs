//! Agent-side dispatcher.
//!
//! Each agent is an [`Actions`] table built once at startup with
//! `add_plugin`. [`run_agent`] turns one request file into one reply file
//! and returns the code the process must exit with.

use std::collections::BTreeMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{RpcCode, RpcReply, RpcRequest, REPLY_FILE_ENV, REQUEST_FILE_ENV};
use crate::shell::CommandRunner;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing required argument '{0}'")]
    MissingData(String),

    #[error("invalid argument '{key}': {reason}")]
    InvalidData { key: String, reason: String },

    #[error("{0}")]
    Aborted(String),
}

impl ActionError {
    pub fn code(&self) -> RpcCode {
        match self {
            ActionError::MissingData(_) => RpcCode::MissingData,
            ActionError::InvalidData { .. } => RpcCode::InvalidData,
            ActionError::Aborted(_) => RpcCode::Aborted,
        }
    }

    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ActionError::InvalidData {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for ActionError {
    fn from(e: io::Error) -> Self {
        ActionError::Aborted(e.to_string())
    }
}

/// What a handler may touch on the node.
pub struct ActionContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub hostname: String,
}

/// Typed accessors over the request `data` payload.
pub struct ActionArgs<'a> {
    data: &'a Map<String, Value>,
}

impl<'a> ActionArgs<'a> {
    pub fn new(data: &'a Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn require_str(&self, key: &str) -> Result<&'a str, ActionError> {
        self.optional_str(key)?
            .ok_or_else(|| ActionError::MissingData(key.to_string()))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&'a str>, ActionError> {
        match self.data.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ActionError::invalid(
                key,
                format!("expected a string, got {other}"),
            )),
        }
    }

    /// Boolean flags arrive as JSON booleans or as `"true"`/`"false"` from the CLI.
    pub fn flag(&self, key: &str) -> Result<bool, ActionError> {
        match self.data.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                other => Err(ActionError::invalid(key, format!("not a boolean: {other}"))),
            },
            Some(other) => Err(ActionError::invalid(key, format!("not a boolean: {other}"))),
        }
    }

    /// Structured argument, given either inline or as a JSON-encoded string.
    pub fn json<T: DeserializeOwned>(&self, key: &str) -> Result<T, ActionError> {
        let value = match self.data.get(key) {
            None | Some(Value::Null) => return Err(ActionError::MissingData(key.to_string())),
            Some(Value::String(s)) => serde_json::from_str(s),
            Some(other) => serde_json::from_value(other.clone()),
        };
        value.map_err(|e| ActionError::invalid(key, e.to_string()))
    }
}

pub type Handler = fn(&ActionContext<'_>, &ActionArgs<'_>) -> Result<RpcReply, ActionError>;

pub struct Actions {
    agent: &'static str,
    handlers: BTreeMap<&'static str, Handler>,
}

/// Result of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub code: RpcCode,
    pub reply: RpcReply,
}

impl Dispatch {
    fn failure(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            reply: RpcReply::failed(code.code(), "", message),
        }
    }
}

impl Actions {
    pub fn new(agent: &'static str) -> Self {
        Self {
            agent,
            handlers: BTreeMap::new(),
        }
    }

    pub fn add_plugin(mut self, action: &'static str, handler: Handler) -> Self {
        self.handlers.insert(action, handler);
        self
    }

    pub fn agent(&self) -> &'static str {
        self.agent
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn dispatch(&self, ctx: &ActionContext<'_>, request: &RpcRequest) -> Dispatch {
        let Some(handler) = self.handlers.get(request.action.as_str()) else {
            warn!(agent = self.agent, action = %request.action, "unknown action");
            return Dispatch::failure(
                RpcCode::UnknownAction,
                format!("Unknown action {} for agent {}", request.action, self.agent),
            );
        };

        info!(
            agent = self.agent,
            action = %request.action,
            caller = %request.callerid,
            uniqid = %request.uniqid,
            "dispatching action"
        );

        let args = ActionArgs::new(&request.data);
        match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, &args))) {
            Ok(Ok(reply)) => Dispatch {
                code: RpcCode::Ok,
                reply,
            },
            Ok(Err(e)) => {
                warn!(agent = self.agent, action = %request.action, error = %e, "action failed");
                Dispatch::failure(e.code(), e.to_string())
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!(agent = self.agent, action = %request.action, detail = %detail, "action panicked");
                Dispatch::failure(RpcCode::UnknownError, detail)
            }
        }
    }
}

/// Read `request_path`, dispatch, write `reply_path`. Returns the exit code.
pub fn run_agent(
    actions: &Actions,
    ctx: &ActionContext<'_>,
    request_path: &Path,
    reply_path: &Path,
) -> RpcCode {
    let dispatch = match read_request(request_path) {
        Ok(request) => {
            if !request.agent.is_empty() && request.agent != actions.agent() {
                warn!(
                    expected = actions.agent(),
                    got = %request.agent,
                    "request addressed to a different agent"
                );
            }
            actions.dispatch(ctx, &request)
        }
        Err(reason) => {
            error!(path = %request_path.display(), reason = %reason, "cannot read request");
            Dispatch::failure(RpcCode::InvalidData, reason)
        }
    };

    match write_reply(reply_path, &dispatch.reply) {
        Ok(()) => dispatch.code,
        Err(e) => {
            error!(path = %reply_path.display(), error = %e, "cannot write reply");
            RpcCode::UnknownError
        }
    }
}

/// [`run_agent`] with paths taken from the MCollective environment.
pub fn run_from_env(actions: &Actions, ctx: &ActionContext<'_>) -> RpcCode {
    match std::env::var_os(REQUEST_FILE_ENV) {
        Some(request) => match std::env::var_os(REPLY_FILE_ENV) {
            Some(reply) => run_agent(actions, ctx, Path::new(&request), Path::new(&reply)),
            None => {
                error!("{REPLY_FILE_ENV} is not set, no reply can be written");
                RpcCode::MissingData
            }
        },
        None => reject_from_env(RpcCode::MissingData, format!("{REQUEST_FILE_ENV} is not set")),
    }
}

/// Answer without dispatching: write a failure reply carrying `code` and
/// `message` to `reply_path`.
pub fn reject(reply_path: &Path, code: RpcCode, message: impl Into<String>) -> RpcCode {
    let dispatch = Dispatch::failure(code, message);
    match write_reply(reply_path, &dispatch.reply) {
        Ok(()) => dispatch.code,
        Err(e) => {
            error!(path = %reply_path.display(), error = %e, "cannot write reply file");
            RpcCode::UnknownError
        }
    }
}

/// [`reject`] into the reply file named by the MCollective environment.
pub fn reject_from_env(code: RpcCode, message: impl Into<String>) -> RpcCode {
    match std::env::var_os(REPLY_FILE_ENV) {
        Some(reply) => reject(Path::new(&reply), code, message),
        None => {
            error!("{REPLY_FILE_ENV} is not set, no reply can be written");
            code
        }
    }
}

fn read_request(path: &Path) -> Result<RpcRequest, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read request file {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("malformed request file {}: {e}", path.display()))
}

fn write_reply(path: &Path, reply: &RpcReply) -> io::Result<()> {
    let body = serde_json::to_string(reply).map_err(io::Error::other)?;
    std::fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::Shell;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn echo(_: &ActionContext<'_>, args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
        Ok(RpcReply::ok(args.require_str("message")?))
    }

    fn exploding(_: &ActionContext<'_>, _: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
        panic!("boom")
    }

    fn refuses(_: &ActionContext<'_>, _: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
        Err(ActionError::Aborted("not today".to_string()))
    }

    fn shell_failure(_: &ActionContext<'_>, _: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
        Ok(RpcReply::failed(1, "", "command failed"))
    }

    fn table() -> Actions {
        Actions::new("test")
            .add_plugin("echo", echo)
            .add_plugin("exploding", exploding)
            .add_plugin("refuses", refuses)
            .add_plugin("shell_failure", shell_failure)
    }

    fn ctx() -> ActionContext<'static> {
        ActionContext {
            runner: &Shell,
            hostname: "node1".to_string(),
        }
    }

    fn run(request: serde_json::Value) -> (RpcCode, RpcReply) {
        let dir = tempfile::tempdir().unwrap();
        let request_path = dir.path().join("request.json");
        let reply_path = dir.path().join("reply.json");
        std::fs::write(&request_path, request.to_string()).unwrap();

        let code = run_agent(&table(), &ctx(), &request_path, &reply_path);
        let reply: RpcReply =
            serde_json::from_str(&std::fs::read_to_string(&reply_path).unwrap()).unwrap();
        (code, reply)
    }

    fn request(action: &str, data: serde_json::Value) -> serde_json::Value {
        json!({
            "callerid": "cert=peadmin",
            "agent": "test",
            "data": data,
            "uniqid": "8c3a",
            "sender": "ms1",
            "action": action,
        })
    }

    #[test]
    fn successful_action_replies_ok() {
        let (code, reply) = run(request("echo", json!({"message": "hi"})));
        assert_eq!(code, RpcCode::Ok);
        assert_eq!(reply, RpcReply::ok("hi"));
    }

    #[test]
    fn unknown_action_exits_with_unknown_action() {
        let (code, reply) = run(request("bogus", json!({})));
        assert_eq!(code, RpcCode::UnknownAction);
        assert_eq!(code.code(), 2);
        assert_eq!(reply.retcode, 2);
        assert!(reply.err.contains("bogus"));
    }

    #[test]
    fn missing_argument_is_missing_data() {
        let (code, reply) = run(request("echo", json!({})));
        assert_eq!(code, RpcCode::MissingData);
        assert_eq!(reply.retcode, 3);
    }

    #[test]
    fn wrong_argument_type_is_invalid_data() {
        let (code, _) = run(request("echo", json!({"message": 42})));
        assert_eq!(code, RpcCode::InvalidData);
    }

    #[test]
    fn handler_failure_is_aborted() {
        let (code, reply) = run(request("refuses", json!({})));
        assert_eq!(code, RpcCode::Aborted);
        assert_eq!(reply.err, "not today");
    }

    #[test]
    fn panic_is_unknown_error() {
        let (code, reply) = run(request("exploding", json!({})));
        assert_eq!(code, RpcCode::UnknownError);
        assert_eq!(reply.err, "boom");
    }

    #[test]
    fn handler_retcode_does_not_change_exit_code() {
        let (code, reply) = run(request("shell_failure", json!({})));
        assert_eq!(code, RpcCode::Ok);
        assert_eq!(reply.retcode, 1);
    }

    #[test]
    fn malformed_request_still_gets_a_reply() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = dir.path().join("request.json");
        let reply_path = dir.path().join("reply.json");
        std::fs::write(&request_path, "{not json").unwrap();

        let code = run_agent(&table(), &ctx(), &request_path, &reply_path);
        assert_eq!(code, RpcCode::InvalidData);
        let reply: RpcReply =
            serde_json::from_str(&std::fs::read_to_string(&reply_path).unwrap()).unwrap();
        assert_eq!(reply.retcode, 4);
    }

    #[test]
    fn flags_accept_strings_and_booleans() {
        let data = json!({"a": true, "b": "true", "c": "false", "d": 3})
            .as_object()
            .cloned()
            .unwrap();
        let args = ActionArgs::new(&data);
        assert!(args.flag("a").unwrap());
        assert!(args.flag("b").unwrap());
        assert!(!args.flag("c").unwrap());
        assert!(!args.flag("missing").unwrap());
        assert!(args.flag("d").is_err());
    }
}
