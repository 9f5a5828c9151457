//! `enminst_snapshots` agent: LVM snapshot create, delete and merge on the
//! local node.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::rpc::agent::{ActionArgs, ActionContext, ActionError, Actions};
use crate::rpc::RpcReply;

const LVCREATE: &str = "/sbin/lvcreate";
const LVREMOVE: &str = "/sbin/lvremove";
const LVCONVERT: &str = "/sbin/lvconvert";
const SYNC: &str = "/bin/sync";

pub fn actions() -> Actions {
    Actions::new("enminst_snapshots")
        .add_plugin("create_lv_snapshots", create_lv_snapshots)
        .add_plugin("delete_lv_snapshots", delete_lv_snapshots)
        .add_plugin("restore_lv_snapshots", restore_lv_snapshots)
        .add_plugin("execute_sync_command", execute_sync_command)
}

#[derive(Debug, Clone, Deserialize)]
struct SnapVolume {
    fs_snap_size: Value,
    snap_name: String,
    lv_path: String,
}

fn size_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `snap_info` maps hostnames to the volumes to snap on that host, and may
/// carry a `snap_tag` entry alongside the hosts.
fn create_lv_snapshots(
    ctx: &ActionContext<'_>,
    args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    let snap_info: BTreeMap<String, Value> = args.json("snap_info")?;

    let tag = match args.optional_str("snap_tag")? {
        Some(tag) => Some(tag.to_string()),
        None => snap_info
            .get("snap_tag")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let Some(volumes) = snap_info.get(&ctx.hostname) else {
        let msg = "No local LVM filesystems to snap.";
        info!(host = %ctx.hostname, "{msg}");
        return Ok(RpcReply::ok(msg));
    };
    let volumes: Vec<SnapVolume> =
        serde_json::from_value(volumes.clone()).map_err(|e| ActionError::InvalidData {
            key: "snap_info".to_string(),
            reason: e.to_string(),
        })?;

    let mut results = Vec::with_capacity(volumes.len());
    for volume in &volumes {
        let extents = format!("{}%ORIGIN", size_text(&volume.fs_snap_size));
        let mut argv = vec![LVCREATE, "--snapshot"];
        if let Some(tag) = &tag {
            argv.extend(["--addtag", tag.as_str()]);
        }
        argv.extend([
            "--extents",
            extents.as_str(),
            "--name",
            volume.snap_name.as_str(),
            volume.lv_path.as_str(),
        ]);

        info!(command = %argv.join(" "), "creating snapshot");
        let output = ctx.runner.run(&argv)?;
        if !output.success() {
            return Ok(RpcReply::failed(output.status, results.join("\n"), output.stderr));
        }
        results.push(output.stdout);
    }

    Ok(RpcReply::ok(results.join("\n")))
}

fn tagged(
    ctx: &ActionContext<'_>,
    args: &ActionArgs<'_>,
    command: &[&str],
) -> Result<RpcReply, ActionError> {
    let tag = format!("@{}", args.require_str("tag_name")?);
    let mut argv = command.to_vec();
    argv.push(&tag);

    info!(command = %argv.join(" "), "running tagged LVM command");
    let output = ctx.runner.run(&argv)?;
    if output.success() {
        Ok(RpcReply::ok(output.stdout))
    } else {
        Ok(RpcReply::failed(output.status, "", output.stderr))
    }
}

fn delete_lv_snapshots(
    ctx: &ActionContext<'_>,
    args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    tagged(ctx, args, &[LVREMOVE, "--force"])
}

fn restore_lv_snapshots(
    ctx: &ActionContext<'_>,
    args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    tagged(ctx, args, &[LVCONVERT, "--merge"])
}

fn execute_sync_command(
    ctx: &ActionContext<'_>,
    _args: &ActionArgs<'_>,
) -> Result<RpcReply, ActionError> {
    let output = ctx.runner.run(&[SYNC])?;
    Ok(RpcReply {
        retcode: output.status,
        out: output.stdout,
        err: output.stderr,
    })
}
