//! `enminst` agent: VCS, credential and shutdown actions run on a managed
//! node.

use tracing::info;

use crate::rpc::agent::{ActionArgs, ActionContext, ActionError, Actions};
use crate::rpc::RpcReply;
use crate::shell::CommandOutput;

const HASYS: &str = "/opt/VRTS/bin/hasys";
const HAGRP: &str = "/opt/VRTS/bin/hagrp";
const GABCONFIG: &str = "/sbin/gabconfig";

pub fn actions() -> Actions {
    Actions::new("enminst")
        .add_plugin("update_initial_credentials", update_initial_credentials)
        .add_plugin("set_cluster_seed_control", set_cluster_seed_control)
        .add_plugin("hasys_state", hasys_state)
        .add_plugin("hagrp_state", hagrp_state)
        .add_plugin("hasys_freeze", hasys_freeze)
        .add_plugin("hasys_unfreeze", hasys_unfreeze)
        .add_plugin("safe_shutdown", safe_shutdown)
        .add_plugin("get_redundancy_level", get_redundancy_level)
}

fn reply(output: CommandOutput) -> RpcReply {
    RpcReply {
        retcode: output.status,
        out: output.stdout,
        err: output.stderr,
    }
}

fn run(ctx: &ActionContext<'_>, action: &str, argv: &[&str]) -> Result<RpcReply, ActionError> {
    info!(action, command = %argv.join(" "), "running");
    Ok(reply(ctx.runner.run(argv)?))
}

/// Set the password of an account whose initial password has expired.
/// Accounts with a valid password are left alone and the reply carries
/// retcode 1.
fn update_initial_credentials(
    ctx: &ActionContext<'_>,
    args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    let user = args.require_str("user")?;
    let new_password = args.require_str("new_password")?;

    let aging = ctx.runner.run(&["chage", "-l", user])?;
    if !aging.success() {
        return Ok(reply(aging));
    }
    let must_change = aging
        .stdout
        .lines()
        .any(|line| line.contains("Password expires") && line.contains("password must be changed"));
    if !must_change {
        info!(user, "password not expired, leaving it unchanged");
        return Ok(RpcReply::failed(1, "", ""));
    }

    info!(user, "setting initial password");
    let input = format!("{new_password}\n");
    let output = ctx
        .runner
        .execute(&["passwd", user, "--stdin"], &[], Some(&input))?;
    Ok(reply(output))
}

fn set_cluster_seed_control(
    ctx: &ActionContext<'_>,
    _args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    run(ctx, "set_cluster_seed_control", &[GABCONFIG, "-x"])
}

fn hasys_state(ctx: &ActionContext<'_>, _args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    run(ctx, "hasys_state", &[HASYS, "-state"])
}

fn hagrp_state(ctx: &ActionContext<'_>, _args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    run(ctx, "hagrp_state", &[HAGRP, "-state"])
}

fn hasys_freeze(ctx: &ActionContext<'_>, args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    let system = args.require_str("system")?;
    let mut argv = vec![HASYS, "-freeze"];
    if args.flag("persistent")? {
        argv.push("-persistent");
    }
    if args.flag("evacuate")? {
        argv.push("-evacuate");
    }
    argv.push(system);
    run(ctx, "hasys_freeze", &argv)
}

fn hasys_unfreeze(ctx: &ActionContext<'_>, args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    let system = args.require_str("system")?;
    let mut argv = vec![HASYS, "-unfreeze"];
    if args.flag("persistent")? {
        argv.push("-persistent");
    }
    argv.push(system);
    run(ctx, "hasys_unfreeze", &argv)
}

fn safe_shutdown(ctx: &ActionContext<'_>, _args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    run(ctx, "safe_shutdown", &["shutdown", "-h", "now"])
}

/// Path listing from DMP when Veritas is installed, native multipath otherwise.
fn get_redundancy_level(
    ctx: &ActionContext<'_>,
    _args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    let dmp = ctx.runner.run(&["/usr/bin/which", "vxdmpadm"])?;
    if dmp.success() {
        run(ctx, "get_redundancy_level", &["/sbin/vxdmpadm", "getsubpaths"])
    } else {
        run(ctx, "get_redundancy_level", &["/sbin/multipath", "-ll"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::actions::testing::{out, ScriptedRunner};
    use crate::rpc::agent::Dispatch;
    use crate::rpc::{RpcCode, RpcRequest};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn dispatch(runner: &ScriptedRunner, action: &str, data: Value) -> Dispatch {
        let ctx = ActionContext {
            runner,
            hostname: "db-2".to_string(),
        };
        let request = RpcRequest {
            callerid: "cert=root".to_string(),
            agent: "enminst".to_string(),
            data: data.as_object().cloned().unwrap_or_default(),
            uniqid: String::new(),
            sender: String::new(),
            action: action.to_string(),
        };
        actions().dispatch(&ctx, &request)
    }

    #[test]
    fn expired_password_is_replaced_through_stdin() {
        let runner = ScriptedRunner::with(vec![
            out(0, "Last password change\t\t\t\t\t: password must be changed\nPassword expires\t\t\t\t\t: password must be changed", ""),
            out(0, "passwd: all authentication tokens updated successfully.", ""),
        ]);

        let result = dispatch(
            &runner,
            "update_initial_credentials",
            json!({"user": "litp-admin", "new_password": "s3cret"}),
        );

        assert_eq!(result.code, RpcCode::Ok);
        assert_eq!(result.reply.retcode, 0);
        assert_eq!(
            *runner.calls.borrow(),
            vec!["chage -l litp-admin", "passwd litp-admin --stdin"]
        );
        assert_eq!(*runner.stdin.borrow(), vec!["s3cret\n"]);
    }

    #[test]
    fn valid_password_is_left_alone() {
        let runner = ScriptedRunner::with(vec![out(0, "Password expires\t\t\t\t\t: never", "")]);

        let result = dispatch(
            &runner,
            "update_initial_credentials",
            json!({"user": "litp-admin", "new_password": "s3cret"}),
        );

        assert_eq!(result.code, RpcCode::Ok);
        assert_eq!(result.reply.retcode, 1);
        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(runner.stdin.borrow().is_empty());
    }

    #[test]
    fn credentials_require_both_arguments() {
        let runner = ScriptedRunner::default();
        let result = dispatch(&runner, "update_initial_credentials", json!({"user": "litp-admin"}));
        assert_eq!(result.code, RpcCode::MissingData);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn freeze_flags_follow_request() {
        let runner = ScriptedRunner::default();
        dispatch(
            &runner,
            "hasys_freeze",
            json!({"system": "db-2", "persistent": "true", "evacuate": true}),
        );
        dispatch(&runner, "hasys_freeze", json!({"system": "db-4"}));
        dispatch(&runner, "hasys_unfreeze", json!({"system": "db-2", "persistent": true}));

        assert_eq!(
            *runner.calls.borrow(),
            vec![
                "/opt/VRTS/bin/hasys -freeze -persistent -evacuate db-2",
                "/opt/VRTS/bin/hasys -freeze db-4",
                "/opt/VRTS/bin/hasys -unfreeze -persistent db-2",
            ]
        );
    }

    #[test]
    fn redundancy_level_prefers_dmp_when_installed() {
        let runner = ScriptedRunner::with(vec![
            out(1, "", "no vxdmpadm in (/usr/bin:/bin)"),
            out(0, "mpatha (3600508b1001c) dm-0 HP,LOGICAL VOLUME", ""),
        ]);
        let native = dispatch(&runner, "get_redundancy_level", json!({}));
        assert_eq!(native.reply.out, "mpatha (3600508b1001c) dm-0 HP,LOGICAL VOLUME");

        let runner_dmp = ScriptedRunner::with(vec![out(0, "/usr/sbin/vxdmpadm", "")]);
        dispatch(&runner_dmp, "get_redundancy_level", json!({}));

        assert_eq!(runner.calls.borrow()[1], "/sbin/multipath -ll");
        assert_eq!(runner_dmp.calls.borrow()[1], "/sbin/vxdmpadm getsubpaths");
    }

    #[test]
    fn command_failure_is_reported_in_reply_not_exit_code() {
        let runner = ScriptedRunner::with(vec![out(1, "", "GAB /dev/gab0 is not configured")]);
        let result = dispatch(&runner, "set_cluster_seed_control", json!({}));
        assert_eq!(result.code, RpcCode::Ok);
        assert_eq!(result.reply.retcode, 1);
        assert_eq!(result.reply.err, "GAB /dev/gab0 is not configured");
        assert_eq!(*runner.calls.borrow(), vec!["/sbin/gabconfig -x"]);
    }
}
