//! Taking the moving blades out of service before they are pulled.

use std::cell::Cell;
use std::time::Duration;

use colored::Colorize;
use tracing::{info, warn};

use super::blade::Blade;
use super::context::ExpansionContext;
use super::error::ExpansionError;
use crate::rpc::vcs::{is_already_frozen, EnminstAgent};
use crate::wait::Poll;

/// Consecutive RPC failures tolerated while polling service group state.
/// A node that is evacuating can briefly stop answering.
const STATE_QUERY_ERRORS: u32 = 3;

/// Freeze, evacuate and shut down every blade, then wait for them to go
/// quiet on the network.
pub fn drain<'b>(
    ctx: &ExpansionContext<'_>,
    blades: impl IntoIterator<Item = &'b Blade>,
) -> Result<(), ExpansionError> {
    let blades: Vec<&Blade> = blades.into_iter().collect();
    let agent = EnminstAgent::new(ctx.rpc);

    for blade in &blades {
        freeze(&agent, blade)?;
        wait_groups_offline(ctx, &agent, blade)?;
    }

    for blade in &blades {
        if !ctx.host.ping(&blade.hostname) {
            info!(system = %blade.system, hostname = %blade.hostname, "host already down");
            continue;
        }
        println!("{} shutting down {}", ">>".blue().bold(), blade.hostname);
        let out = agent.safe_shutdown(&blade.hostname)?;
        info!(system = %blade.system, output = %out, "shutdown requested");
    }

    let waiter = ctx.waiter();
    let timeout = Duration::from_secs(ctx.settings.timeouts.shutdown);
    for blade in &blades {
        let what = format!("{} to stop answering ping", blade.hostname);
        waiter.until(&what, timeout, || -> Result<_, ExpansionError> {
            Ok(if ctx.host.ping(&blade.hostname) {
                Poll::Pending("answering ping".to_string())
            } else {
                Poll::Ready(())
            })
        })?;
        println!("{} {} is down", "ok".green().bold(), blade.hostname);
    }
    Ok(())
}

fn freeze(agent: &EnminstAgent<'_>, blade: &Blade) -> Result<(), ExpansionError> {
    match agent.hasys_freeze(&blade.hostname, true, true) {
        Ok(()) => {
            info!(system = %blade.system, "system frozen");
            Ok(())
        }
        Err(e) if is_already_frozen(&e) => {
            info!(system = %blade.system, "system already frozen");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn wait_groups_offline(
    ctx: &ExpansionContext<'_>,
    agent: &EnminstAgent<'_>,
    blade: &Blade,
) -> Result<(), ExpansionError> {
    let failures = Cell::new(0u32);
    let what = format!("service groups on {} to go offline", blade.hostname);
    let timeout = Duration::from_secs(ctx.settings.timeouts.service_offline);

    ctx.waiter().until(&what, timeout, || -> Result<_, ExpansionError> {
        let groups = match agent.hagrp_state(&blade.hostname) {
            Ok(groups) => {
                failures.set(0);
                groups
            }
            Err(e) => {
                failures.set(failures.get() + 1);
                if failures.get() > STATE_QUERY_ERRORS {
                    return Err(e.into());
                }
                warn!(system = %blade.system, error = %e, attempt = failures.get(), "service group query failed");
                return Ok(Poll::Pending(e.to_string()));
            }
        };

        let online: Vec<String> = groups
            .iter()
            .filter(|g| g.system == blade.hostname && !g.is_offline())
            .map(|g| format!("{}={}", g.group, g.states.join("|")))
            .collect();
        Ok(if online.is_empty() {
            info!(system = %blade.system, "service groups offline");
            Poll::Ready(())
        } else {
            Poll::Pending(online.join(", "))
        })
    })
}
