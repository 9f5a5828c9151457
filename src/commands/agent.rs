//! `enminst agent <name>`: serve one MCollective request.

use anyhow::Result;
use colored::Colorize;

use enminst::rpc::actions;
use enminst::rpc::agent::{self, ActionContext};
use enminst::rpc::RpcCode;
use enminst::shell::Shell;

/// Dispatch the request named by the MCollective environment and return
/// the canonical code the process should exit with.
pub fn run(name: &str) -> Result<RpcCode> {
    let Some(actions) = actions::agent(name) else {
        eprintln!(
            "{} unknown agent '{name}' (expected one of: {})",
            "!!".red().bold(),
            actions::AGENTS.join(", ")
        );
        return Ok(agent::reject_from_env(
            RpcCode::UnknownAction,
            format!("Unknown agent {name}"),
        ));
    };

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ctx = ActionContext {
        runner: &Shell,
        hostname,
    };
    Ok(agent::run_from_env(&actions, &ctx))
}
