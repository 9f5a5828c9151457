//! Caller side: fan one action out to a set of nodes over `mco rpc` and
//! collect one result per node.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::RpcReply;
use crate::config::McoSettings;
use crate::shell::{CommandRunner, Shell};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("mco {agent}.{action} could not be run: {reason}")]
    Transport {
        agent: String,
        action: String,
        reason: String,
    },

    #[error("no reply from {node} for {agent}.{action}: {reason}")]
    NoReply {
        agent: String,
        action: String,
        node: String,
        reason: String,
    },

    #[error("{agent}.{action} failed on {node} (retcode {retcode}): {err}")]
    Agent {
        agent: String,
        action: String,
        node: String,
        retcode: i32,
        err: String,
    },

    #[error("cannot decode {agent}.{action} output: {reason}")]
    Decode {
        agent: String,
        action: String,
        reason: String,
    },
}

/// One sender's entry in the `mco rpc --json` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusReply {
    pub sender: String,
    #[serde(default)]
    pub statuscode: i32,
    #[serde(default)]
    pub statusmsg: String,
    #[serde(default)]
    pub data: Value,
}

pub type Kwargs = BTreeMap<String, String>;

/// Moves a request onto the bus and returns whatever senders answered.
pub trait RpcTransport {
    fn call(
        &self,
        nodes: &[String],
        agent: &str,
        action: &str,
        kwargs: &Kwargs,
        timeout: u64,
    ) -> Result<Vec<BusReply>, RpcError>;
}

/// `mco rpc <agent> <action> k=v... -I node... --json -t <timeout>`.
pub struct McoTransport {
    binary: String,
    runner: Box<dyn CommandRunner>,
}

impl McoTransport {
    pub fn new(binary: impl Into<String>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }
}

impl RpcTransport for McoTransport {
    fn call(
        &self,
        nodes: &[String],
        agent: &str,
        action: &str,
        kwargs: &Kwargs,
        timeout: u64,
    ) -> Result<Vec<BusReply>, RpcError> {
        let pairs: Vec<String> = kwargs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let timeout = timeout.to_string();

        let mut argv = vec![self.binary.as_str(), "rpc", agent, action];
        argv.extend(pairs.iter().map(String::as_str));
        for node in nodes {
            argv.extend(["-I", node.as_str()]);
        }
        argv.extend(["--json", "-t", timeout.as_str()]);

        debug!(command = %argv.join(" "), "mco rpc");
        let output = self.runner.run(&argv).map_err(|e| RpcError::Transport {
            agent: agent.to_string(),
            action: action.to_string(),
            reason: e.to_string(),
        })?;

        if output.stdout.trim().is_empty() {
            return Err(RpcError::Transport {
                agent: agent.to_string(),
                action: action.to_string(),
                reason: format!("exit {}: {}", output.status, output.stderr),
            });
        }

        serde_json::from_str(&output.stdout).map_err(|e| RpcError::Decode {
            agent: agent.to_string(),
            action: action.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Per-node outcome. `errors` is set for bus-level failures only; a handler
/// that ran and returned a non-zero retcode leaves it empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeResult {
    pub errors: Option<String>,
    pub data: Option<RpcReply>,
}

pub struct RpcCaller {
    transport: Box<dyn RpcTransport>,
    timeout: u64,
    retries: u32,
}

impl RpcCaller {
    pub fn new(transport: Box<dyn RpcTransport>, timeout: u64, retries: u32) -> Self {
        Self {
            transport,
            timeout,
            retries,
        }
    }

    pub fn from_settings(settings: &McoSettings) -> Self {
        Self::new(
            Box::new(McoTransport::new(settings.binary.clone(), Box::new(Shell))),
            settings.timeout,
            settings.retries,
        )
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// Nodes that fail at the transport level, or never answer, are asked
    /// again up to `retries` more times.
    pub fn run(
        &self,
        nodes: &[String],
        agent: &str,
        action: &str,
        kwargs: &Kwargs,
        timeout: Option<u64>,
    ) -> BTreeMap<String, NodeResult> {
        let timeout = timeout.unwrap_or(self.timeout);
        let mut results: BTreeMap<String, NodeResult> = BTreeMap::new();
        let mut pending: Vec<String> = nodes.to_vec();

        for attempt in 0..=self.retries {
            if pending.is_empty() {
                break;
            }
            if attempt > 0 {
                warn!(agent, action, attempt, nodes = ?pending, "retrying mco rpc");
            }

            match self.transport.call(&pending, agent, action, kwargs, timeout) {
                Err(e) => {
                    for node in &pending {
                        results.insert(
                            node.clone(),
                            NodeResult {
                                errors: Some(e.to_string()),
                                data: None,
                            },
                        );
                    }
                }
                Ok(replies) => {
                    let mut answered = Vec::new();
                    for reply in replies {
                        if !pending.contains(&reply.sender) {
                            continue;
                        }
                        answered.push(reply.sender.clone());
                        results.insert(reply.sender.clone(), Self::node_result(reply));
                    }
                    for node in pending.iter().filter(|n| !answered.contains(n)) {
                        results.insert(
                            node.clone(),
                            NodeResult {
                                errors: Some("No answer from node".to_string()),
                                data: None,
                            },
                        );
                    }
                    pending.retain(|n| !answered.contains(n));
                }
            }
        }
        results
    }

    fn node_result(reply: BusReply) -> NodeResult {
        if reply.statuscode != 0 {
            return NodeResult {
                errors: Some(reply.statusmsg),
                data: serde_json::from_value(reply.data).ok(),
            };
        }
        match serde_json::from_value::<RpcReply>(reply.data) {
            Ok(data) => NodeResult {
                errors: None,
                data: Some(data),
            },
            Err(e) => NodeResult {
                errors: Some(format!("malformed reply data: {e}")),
                data: None,
            },
        }
    }

    /// Run on one node and return its reply, whatever its retcode.
    pub fn call_node(
        &self,
        node: &str,
        agent: &str,
        action: &str,
        kwargs: &Kwargs,
        timeout: Option<u64>,
    ) -> Result<RpcReply, RpcError> {
        let mut results = self.run(&[node.to_string()], agent, action, kwargs, timeout);
        let result = results.remove(node).unwrap_or_default();
        match (result.errors, result.data) {
            (None, Some(data)) => Ok(data),
            (errors, _) => Err(RpcError::NoReply {
                agent: agent.to_string(),
                action: action.to_string(),
                node: node.to_string(),
                reason: errors.unwrap_or_else(|| "empty result".to_string()),
            }),
        }
    }

    /// Run on one node; a non-zero retcode becomes [`RpcError::Agent`].
    pub fn exec(
        &self,
        node: &str,
        agent: &str,
        action: &str,
        kwargs: &Kwargs,
        timeout: Option<u64>,
    ) -> Result<String, RpcError> {
        let reply = self.call_node(node, agent, action, kwargs, timeout)?;
        if reply.retcode != 0 {
            return Err(RpcError::Agent {
                agent: agent.to_string(),
                action: action.to_string(),
                node: node.to_string(),
                retcode: reply.retcode,
                err: if reply.err.is_empty() { reply.out } else { reply.err },
            });
        }
        Ok(reply.out)
    }
}

/// Build [`Kwargs`] from `(key, value)` pairs.
pub fn kwargs<const N: usize>(pairs: [(&str, String); N]) -> Kwargs {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::actions::testing::{out, ScriptedRunner};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Answers each call from a queue and records the nodes asked.
    struct QueueTransport {
        asked: RefCell<Vec<Vec<String>>>,
        answers: RefCell<VecDeque<Result<Vec<BusReply>, RpcError>>>,
    }

    impl QueueTransport {
        fn new(answers: Vec<Result<Vec<BusReply>, RpcError>>) -> Self {
            Self {
                asked: RefCell::new(Vec::new()),
                answers: RefCell::new(answers.into()),
            }
        }
    }

    impl RpcTransport for std::rc::Rc<QueueTransport> {
        fn call(
            &self,
            nodes: &[String],
            _agent: &str,
            _action: &str,
            _kwargs: &Kwargs,
            _timeout: u64,
        ) -> Result<Vec<BusReply>, RpcError> {
            self.asked.borrow_mut().push(nodes.to_vec());
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn reply(sender: &str, statuscode: i32, retcode: i32) -> BusReply {
        BusReply {
            sender: sender.to_string(),
            statuscode,
            statusmsg: if statuscode == 0 { "OK".into() } else { "Aborted".into() },
            data: json!({"retcode": retcode, "out": "done", "err": ""}),
        }
    }

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn missing_sender_is_retried_alone() {
        let transport = std::rc::Rc::new(QueueTransport::new(vec![
            Ok(vec![reply("db-1", 0, 0)]),
            Ok(vec![reply("db-2", 0, 0)]),
        ]));
        let caller = RpcCaller::new(Box::new(transport.clone()), 60, 2);

        let results = caller.run(&nodes(&["db-1", "db-2"]), "enminst", "hasys_state", &Kwargs::new(), None);

        assert_eq!(
            *transport.asked.borrow(),
            vec![nodes(&["db-1", "db-2"]), nodes(&["db-2"])]
        );
        assert!(results.values().all(|r| r.errors.is_none()));
    }

    #[test]
    fn handler_retcode_is_data_not_error() {
        let transport = std::rc::Rc::new(QueueTransport::new(vec![Ok(vec![reply("db-1", 0, 1)])]));
        let caller = RpcCaller::new(Box::new(transport.clone()), 60, 2);

        let results = caller.run(&nodes(&["db-1"]), "enminst", "hasys_freeze", &Kwargs::new(), None);

        assert_eq!(results["db-1"].errors, None);
        assert_eq!(results["db-1"].data.as_ref().unwrap().retcode, 1);
        assert_eq!(transport.asked.borrow().len(), 1);

        let err = caller
            .exec("db-1", "enminst", "hasys_freeze", &Kwargs::new(), None)
            .unwrap_err();
        assert!(matches!(err, RpcError::Agent { retcode: 1, .. }));
    }

    #[test]
    fn transport_failure_exhausts_retries() {
        let failure = || {
            Err(RpcError::Transport {
                agent: "enminst".into(),
                action: "safe_shutdown".into(),
                reason: "connection refused".into(),
            })
        };
        let transport = std::rc::Rc::new(QueueTransport::new(vec![failure(), failure(), failure()]));
        let caller = RpcCaller::new(Box::new(transport.clone()), 60, 2);

        let results = caller.run(&nodes(&["db-2"]), "enminst", "safe_shutdown", &Kwargs::new(), None);

        assert_eq!(transport.asked.borrow().len(), 3);
        assert!(results["db-2"].errors.as_ref().unwrap().contains("connection refused"));
    }

    #[test]
    fn non_zero_statuscode_sets_errors_without_retry() {
        let transport = std::rc::Rc::new(QueueTransport::new(vec![Ok(vec![reply("db-1", 1, 0)])]));
        let caller = RpcCaller::new(Box::new(transport.clone()), 60, 2);

        let results = caller.run(&nodes(&["db-1"]), "enminst", "hagrp_state", &Kwargs::new(), None);

        assert_eq!(results["db-1"].errors.as_deref(), Some("Aborted"));
        assert_eq!(transport.asked.borrow().len(), 1);
    }

    #[test]
    fn mco_transport_builds_argv_and_decodes_json() {
        let runner = ScriptedRunner::with(vec![out(
            0,
            r#"[{"sender":"db-2","statuscode":0,"statusmsg":"OK","data":{"retcode":0,"out":"frozen","err":""}}]"#,
            "",
        )]);
        let runner = std::rc::Rc::new(runner);
        let transport = McoTransport::new("/usr/bin/mco", Box::new(runner.clone()));

        let replies = transport
            .call(
                &nodes(&["db-2"]),
                "enminst",
                "hasys_freeze",
                &kwargs([("system", "db-2".to_string()), ("evacuate", "true".to_string())]),
                120,
            )
            .unwrap();

        assert_eq!(
            *runner.calls.borrow(),
            vec!["/usr/bin/mco rpc enminst hasys_freeze evacuate=true system=db-2 -I db-2 --json -t 120"]
        );
        assert_eq!(replies[0].sender, "db-2");
        assert_eq!(replies[0].data["out"], "frozen");
    }

    #[test]
    fn empty_mco_output_is_transport_error() {
        let runner = ScriptedRunner::with(vec![out(1, "", "No request sent, we did not discover any nodes.")]);
        let transport = McoTransport::new("/usr/bin/mco", Box::new(runner));

        let err = transport
            .call(&nodes(&["db-9"]), "enminst", "hasys_state", &Kwargs::new(), 10)
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
    }
}
