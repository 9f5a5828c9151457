//! Blocking HTTP client for the LITP REST API.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::error::{LitpError, LitpMessage};
use super::item::{child_path, normalize, ModelItem, PlanState, Properties, RawItem};
use super::retry::RetryPolicy;
use super::{ModelApi, PlanOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;

const DO_NOTHING_PLAN: &str = "DoNothingPlanError";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Read the `[litp-client]` section of a `.litprc` file.
    pub fn from_litprc(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(parse_litprc(&content))
    }
}

fn parse_litprc(content: &str) -> Option<Credentials> {
    let mut in_section = false;
    let mut username = None;
    let mut password = None;

    for line in content.lines().map(str::trim) {
        if line.starts_with('[') {
            in_section = line == "[litp-client]";
            continue;
        }
        if !in_section || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(at) = line.find(['=', ':']) {
            let (key, value) = (&line[..at], &line[at + 1..]);
            match key.trim() {
                "username" => username = Some(value.trim().to_string()),
                "password" => password = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    Some(Credentials {
        username: username?,
        password: password?,
    })
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    messages: Vec<LitpMessage>,
}

pub struct LitpClient {
    base_url: String,
    http: Client,
    credentials: Option<Credentials>,
    reads: RetryPolicy,
    clock: Box<dyn Clock>,
}

impl LitpClient {
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("building LITP HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials,
            reads: RetryPolicy::never(),
            clock: Box::new(SystemClock),
        })
    }

    /// Build a client from settings, reading `.litprc` unless credentials are
    /// configured explicitly.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let litp = &settings.litp;
        let credentials = match (&litp.username, &litp.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => match settings.litprc_path() {
                Some(path) => Credentials::from_litprc(&path)?,
                None => None,
            },
        };

        let client = Self::new(
            &litp.url,
            credentials,
            Duration::from_secs(litp.request_timeout),
        )?
        .with_read_policy(RetryPolicy::reads(
            litp.read_attempts,
            Duration::from_secs(litp.read_retry_delay),
        ));
        Ok(client)
    }

    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.reads = policy;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, normalize(path))
    }

    /// One request, no retries. An empty body decodes to `Value::Null`.
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, LitpError> {
        debug!(method = %method, path, "LITP request");

        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let transport = |e: reqwest::Error| LitpError::Transport {
            path: path.to_string(),
            reason: e.to_string(),
        };
        let response = request.send().map_err(transport)?;
        let status = response.status();
        let text = response.text().map_err(transport)?;

        if status == StatusCode::NOT_FOUND {
            return Err(LitpError::NotFound {
                path: normalize(path),
            });
        }
        if !status.is_success() {
            let messages = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) if !body.messages.is_empty() => body.messages,
                _ => vec![LitpMessage {
                    kind: String::new(),
                    message: text.trim().to_string(),
                }],
            };
            return Err(LitpError::Model {
                method: method.to_string(),
                path: normalize(path),
                status: status.as_u16(),
                messages,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| LitpError::Decode {
            path: normalize(path),
            reason: e.to_string(),
        })
    }

    fn read_raw(&self, path: &str) -> Result<RawItem, LitpError> {
        self.reads.run(self.clock.as_ref(), path, || {
            let value = self.send(Method::GET, path, None)?;
            decode_item(path, value)
        })
    }
}

fn decode_item(path: &str, value: Value) -> Result<RawItem, LitpError> {
    serde_json::from_value(value).map_err(|e| LitpError::Decode {
        path: normalize(path),
        reason: e.to_string(),
    })
}

impl ModelApi for LitpClient {
    fn get(&self, path: &str) -> Result<ModelItem, LitpError> {
        let raw = self.read_raw(path)?;
        Ok(ModelItem::from_raw(path, raw))
    }

    fn get_children(&self, path: &str) -> Result<Vec<ModelItem>, LitpError> {
        let raw = self.read_raw(path)?;
        let children = raw.embedded.map(|e| e.item).unwrap_or_default();
        Ok(children
            .into_iter()
            .map(|child| {
                let location = child_path(path, &child.id);
                ModelItem::from_raw(&location, child)
            })
            .collect())
    }

    fn create(
        &self,
        parent: &str,
        id: &str,
        item_type: &str,
        properties: &Properties,
    ) -> Result<ModelItem, LitpError> {
        let path = child_path(parent, id);
        if self.exists(&path)? {
            debug!(path = %path, "item already present, updating properties instead");
            self.update(&path, properties)?;
            return self.get(&path);
        }

        let body = json!({ "id": id, "type": item_type, "properties": properties });
        let value = self.send(Method::POST, parent, Some(&body))?;
        info!(path = %path, item_type, "created LITP item");
        if value.is_null() {
            return self.get(&path);
        }
        Ok(ModelItem::from_raw(&path, decode_item(&path, value)?))
    }

    fn update(&self, path: &str, properties: &Properties) -> Result<bool, LitpError> {
        let current = self.get(path)?;
        let changed: Properties = properties
            .iter()
            .filter(|(k, v)| current.properties.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if changed.is_empty() {
            return Ok(false);
        }

        self.send(Method::PUT, path, Some(&json!({ "properties": changed })))?;
        info!(path, properties = ?changed.keys().collect::<Vec<_>>(), "updated LITP item");
        Ok(true)
    }

    fn delete(&self, path: &str) -> Result<bool, LitpError> {
        match self.send(Method::DELETE, path, None) {
            Ok(_) => {
                info!(path, "deleted LITP item");
                Ok(true)
            }
            Err(LitpError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_plan(&self, name: &str) -> Result<PlanOutcome, LitpError> {
        let body = json!({ "id": name, "type": "plan" });
        match self.send(Method::POST, "/plans", Some(&body)) {
            Ok(_) => Ok(PlanOutcome::Created),
            Err(e) if e.has_message_type(DO_NOTHING_PLAN) => Ok(PlanOutcome::NothingToDo),
            Err(e) => Err(e),
        }
    }

    fn set_plan_state(&self, name: &str, state: PlanState) -> Result<(), LitpError> {
        let body = json!({ "properties": { "state": state.as_str() } });
        self.send(Method::PUT, &format!("/plans/{name}"), Some(&body))?;
        Ok(())
    }

    fn get_plan_state(&self, name: &str) -> Result<PlanState, LitpError> {
        let path = format!("/plans/{name}");
        let item = self.get(&path)?;
        let state = item.property("state").ok_or_else(|| LitpError::Decode {
            path: path.clone(),
            reason: "plan has no state property".to_string(),
        })?;
        state
            .parse()
            .map_err(|reason| LitpError::Decode { path, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    fn client(server: &Server) -> LitpClient {
        LitpClient::new(
            &format!("{}/litp/rest/v1", server.url()),
            Some(Credentials {
                username: "litp-admin".to_string(),
                password: "secret".to_string(),
            }),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    const BMC: &str = "/litp/rest/v1/infrastructure/systems/db-1_system/bmc";

    fn bmc_body(ip: &str, state: &str) -> String {
        json!({
            "id": "bmc",
            "item-type-name": "bmc",
            "state": state,
            "properties": {"ipaddress": ip, "username": "root", "password_key": "key-for-db_node1_ilo"}
        })
        .to_string()
    }

    #[test]
    fn get_decodes_item_and_sends_credentials() {
        let mut server = Server::new();
        let m = server
            .mock("GET", BMC)
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_body(bmc_body("10.36.49.99", "Applied"))
            .create();

        let item = client(&server)
            .get("/infrastructure/systems/db-1_system/bmc")
            .unwrap();

        m.assert();
        assert_eq!(item.property("ipaddress"), Some("10.36.49.99"));
        assert_eq!(item.path, "/infrastructure/systems/db-1_system/bmc");
    }

    #[test]
    fn not_found_is_typed_and_exists_is_false() {
        let mut server = Server::new();
        let _m = server
            .mock("GET", BMC)
            .with_status(404)
            .with_body(r#"{"messages": [{"type": "InvalidLocationError", "message": "Not found"}]}"#)
            .expect(2)
            .create();
        let client = client(&server);

        let err = client.get("/infrastructure/systems/db-1_system/bmc").unwrap_err();
        assert!(err.is_not_found());
        assert!(!client.exists("/infrastructure/systems/db-1_system/bmc").unwrap());
    }

    #[test]
    fn model_errors_carry_messages() {
        let mut server = Server::new();
        let _m = server
            .mock("DELETE", BMC)
            .with_status(422)
            .with_body(r#"{"messages": [{"type": "ValidationError", "message": "cannot delete"}]}"#)
            .create();

        let err = client(&server)
            .delete("/infrastructure/systems/db-1_system/bmc")
            .unwrap_err();
        match err {
            LitpError::Model { status, messages, .. } => {
                assert_eq!(status, 422);
                assert_eq!(messages[0].kind, "ValidationError");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn delete_of_absent_item_succeeds() {
        let mut server = Server::new();
        let _m = server.mock("DELETE", BMC).with_status(404).create();

        let removed = client(&server)
            .delete("/infrastructure/systems/db-1_system/bmc")
            .unwrap();
        assert!(!removed);
    }

    #[test]
    fn get_children_uses_embedded_items() {
        let mut server = Server::new();
        let _m = server
            .mock("GET", "/litp/rest/v1/deployments")
            .with_status(200)
            .with_body(
                json!({
                    "id": "deployments",
                    "_embedded": {"item": [
                        {"id": "enm", "item-type-name": "deployment", "state": "Applied"},
                    ]}
                })
                .to_string(),
            )
            .create();

        let children = client(&server).get_children("/deployments").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "/deployments/enm");
    }

    #[test]
    fn update_only_puts_changed_properties() {
        let mut server = Server::new();
        let _get = server
            .mock("GET", BMC)
            .with_status(200)
            .with_body(bmc_body("10.36.49.99", "Applied"))
            .expect(2)
            .create();
        let put = server
            .mock("PUT", BMC)
            .match_body(Matcher::Json(json!({"properties": {"ipaddress": "10.36.49.170"}})))
            .with_status(200)
            .with_body(bmc_body("10.36.49.170", "Updated"))
            .expect(1)
            .create();
        let client = client(&server);

        let mut props = Properties::new();
        props.insert("ipaddress".to_string(), "10.36.49.170".to_string());
        props.insert("username".to_string(), "root".to_string());
        assert!(client.update("/infrastructure/systems/db-1_system/bmc", &props).unwrap());

        let mut same = Properties::new();
        same.insert("username".to_string(), "root".to_string());
        assert!(!client.update("/infrastructure/systems/db-1_system/bmc", &same).unwrap());

        put.assert();
    }

    #[test]
    fn create_plan_reports_nothing_to_do() {
        let mut server = Server::new();
        let _m = server
            .mock("POST", "/litp/rest/v1/plans")
            .with_status(422)
            .with_body(r#"{"messages": [{"type": "DoNothingPlanError", "message": "no tasks were generated"}]}"#)
            .create();

        assert_eq!(
            client(&server).create_plan("plan").unwrap(),
            PlanOutcome::NothingToDo
        );
    }

    #[test]
    fn create_plan_falls_back_to_message_text() {
        let mut server = Server::new();
        let _m = server
            .mock("POST", "/litp/rest/v1/plans")
            .with_status(422)
            .with_body("Create plan failed: DoNothingPlanError")
            .create();

        assert_eq!(
            client(&server).create_plan("plan").unwrap(),
            PlanOutcome::NothingToDo
        );
    }

    #[test]
    fn plan_state_is_read_from_properties() {
        let mut server = Server::new();
        let _m = server
            .mock("GET", "/litp/rest/v1/plans/plan")
            .with_status(200)
            .with_body(r#"{"id": "plan", "item-type-name": "plan", "properties": {"state": "running"}}"#)
            .create();

        assert_eq!(
            client(&server).get_plan_state("plan").unwrap(),
            PlanState::Running
        );
    }

    #[test]
    fn read_retries_are_bounded_in_wall_time() {
        let delay = Duration::from_millis(100);
        let client = LitpClient::new("http://127.0.0.1:9", None, Duration::from_millis(200))
            .unwrap()
            .with_read_policy(RetryPolicy::reads(4, delay));

        let start = std::time::Instant::now();
        let err = client.get("/deployments").unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, LitpError::Transport { .. }));
        assert!(elapsed <= delay * 4 + Duration::from_secs(1), "took {elapsed:?}");
    }

    #[test]
    fn litprc_section_is_parsed() {
        let creds = parse_litprc(
            "[other]\nusername = nope\n\n[litp-client]\nusername = litp-admin\npassword = p4ss\n",
        )
        .unwrap();
        assert_eq!(creds.username, "litp-admin");
        assert_eq!(creds.password, "p4ss");
        assert!(parse_litprc("[litp-client]\nusername = x\n").is_none());
    }

    #[test]
    fn litprc_keys_outside_the_section_are_ignored() {
        assert!(parse_litprc("username = litp-admin\npassword = p4ss\n").is_none());
        assert!(parse_litprc("").is_none());
    }

    #[test]
    fn litprc_comments_are_skipped() {
        let creds = parse_litprc(
            "# written by the installer\n; username = old\n[litp-client]\n# password = stale\nusername: litp-admin\npassword = a=b:c\n",
        )
        .unwrap();
        assert_eq!(creds.username, "litp-admin");
        assert_eq!(creds.password, "a=b:c");
    }
}
