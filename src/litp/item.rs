//! Snapshots of LITP model items and the plan/item state vocabularies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Initial,
    Running,
    Stopping,
    Stopped,
    Successful,
    Failed,
    Invalid,
}

impl PlanState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanState::Initial => "initial",
            PlanState::Running => "running",
            PlanState::Stopping => "stopping",
            PlanState::Stopped => "stopped",
            PlanState::Successful => "successful",
            PlanState::Failed => "failed",
            PlanState::Invalid => "invalid",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PlanState::Running | PlanState::Stopping)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(PlanState::Initial),
            "running" => Ok(PlanState::Running),
            "stopping" => Ok(PlanState::Stopping),
            "stopped" => Ok(PlanState::Stopped),
            "successful" => Ok(PlanState::Successful),
            "failed" => Ok(PlanState::Failed),
            "invalid" => Ok(PlanState::Invalid),
            other => Err(format!("unknown plan state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Initial,
    Applied,
    Updated,
    ForRemoval,
    Removed,
    #[serde(other)]
    Unknown,
}

/// Read-only copy of one item as the orchestrator reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelItem {
    pub path: String,
    pub id: String,
    pub item_type: String,
    pub state: Option<ItemState>,
    pub properties: Properties,
}

impl ModelItem {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn is_initial(&self) -> bool {
        self.state == Some(ItemState::Initial)
    }

    pub(crate) fn from_raw(path: &str, raw: RawItem) -> Self {
        let properties = raw
            .properties
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();

        Self {
            path: normalize(path),
            id: raw.id,
            item_type: raw.item_type,
            state: raw.state,
            properties,
        }
    }
}

/// Wire shape of an item body.
#[derive(Debug, Deserialize)]
pub(crate) struct RawItem {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "item-type-name", default)]
    pub item_type: String,
    #[serde(default)]
    pub state: Option<ItemState>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<Embedded>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Embedded {
    #[serde(default)]
    pub item: Vec<RawItem>,
}

pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

pub fn child_path(parent: &str, id: &str) -> String {
    format!("{}/{}", normalize(parent).trim_end_matches('/'), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_item_body() {
        let body = r#"{
            "id": "bmc",
            "item-type-name": "bmc",
            "state": "Applied",
            "applied_properties_determinable": true,
            "properties": {"ipaddress": "10.36.49.99", "username": "root"},
            "_links": {"self": {"href": "https://localhost:9999/litp/rest/v1/infrastructure/systems/db-1_system/bmc"}}
        }"#;
        let raw: RawItem = serde_json::from_str(body).unwrap();
        let item = ModelItem::from_raw("/infrastructure/systems/db-1_system/bmc/", raw);

        assert_eq!(item.path, "/infrastructure/systems/db-1_system/bmc");
        assert_eq!(item.item_type, "bmc");
        assert_eq!(item.state, Some(ItemState::Applied));
        assert_eq!(item.property("ipaddress"), Some("10.36.49.99"));
        assert!(!item.is_initial());
    }

    #[test]
    fn unknown_item_state_is_tolerated() {
        let raw: RawItem = serde_json::from_str(r#"{"id": "x", "state": "Frobbed"}"#).unwrap();
        assert_eq!(raw.state, Some(ItemState::Unknown));
    }

    #[test]
    fn plan_state_round_trips_through_text() {
        for state in ["initial", "running", "stopped", "successful", "failed", "invalid"] {
            assert_eq!(state.parse::<PlanState>().unwrap().to_string(), state);
        }
        assert!("bogus".parse::<PlanState>().is_err());
    }

    #[test]
    fn child_paths_ignore_trailing_slash() {
        assert_eq!(
            child_path("/infrastructure/systems/db-1_system/", "bmc"),
            "/infrastructure/systems/db-1_system/bmc"
        );
    }
}
