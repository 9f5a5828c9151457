//! `filemanager` agent: materialise a file stored in consul's key/value
//! store onto the local node.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info};

use crate::rpc::agent::{ActionArgs, ActionContext, ActionError, Actions};
use crate::rpc::RpcReply;

const FILE_MODE: u32 = 0o755;

pub fn actions() -> Actions {
    Actions::new("filemanager").add_plugin("pull_file", pull_file)
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

fn pull_file(_ctx: &ActionContext<'_>, args: &ActionArgs<'_>) -> Result<RpcReply, ActionError> {
    let url = args.require_str("consul_url")?;
    let file_path = Path::new(args.require_str("file_path")?);

    let contents = match fetch(url) {
        Ok(contents) => contents,
        Err(message) => {
            info!(url, "{message}");
            return Ok(RpcReply::failed(1, "", message));
        }
    };
    let fetched = format!("Request \"{url}\" returned \"200\"");

    if let Err(e) = write_file(file_path, &contents) {
        return Ok(RpcReply::failed(1, "", format!("Unexpected error: {e}")));
    }

    info!(url, path = %file_path.display(), bytes = contents.len(), "pulled file from consul");
    Ok(RpcReply::ok(format!(
        "{fetched}\nFile \"{}\" written successfully",
        file_path.display()
    )))
}

fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))
}

/// GET the key and unwrap its value. Values are stored base64 encoded
/// twice: once by the writer, once by consul itself.
fn fetch(url: &str) -> Result<Vec<u8>, String> {
    let failed = |detail: String| format!("Request \"{url}\" failed with Error \"{detail}\"");

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client.get(url).send().map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if status.as_u16() != 200 {
        return Err(failed(status.as_u16().to_string()));
    }
    debug!(url, "consul answered 200");

    let entries: Vec<KvEntry> = response.json().map_err(|e| failed(e.to_string()))?;
    let encoded = entries
        .into_iter()
        .next()
        .and_then(|entry| entry.value)
        .ok_or_else(|| failed("key has no value".to_string()))?;

    let once = STANDARD
        .decode(encoded.trim())
        .map_err(|e| failed(format!("bad base64: {e}")))?;
    let once = String::from_utf8(once).map_err(|e| failed(e.to_string()))?;
    STANDARD
        .decode(once.trim())
        .map_err(|e| failed(format!("bad base64: {e}")))
}
