//! What the LITP model says about the peer nodes: cluster membership,
//! hostnames and the `bmc` (iLO) item under each system.

use tracing::debug;

use crate::litp::{child_path, ItemState, LitpError, ModelApi, ModelItem, Properties};

const DEPLOYMENTS: &str = "/deployments";
const INVALID_LOCATION: &str = "InvalidLocationError";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub cluster: String,
    /// Item id of the node, e.g. `db-2`.
    pub system: String,
    pub hostname: String,
}

impl ClusterNode {
    /// Numeric suffix of the system name.
    pub fn number(&self) -> Option<u32> {
        self.system.rsplit_once('-')?.1.parse().ok()
    }
}

/// Peer nodes of every cluster in every deployment, clusters in name order.
pub fn cluster_nodes(api: &dyn ModelApi) -> Result<Vec<ClusterNode>, LitpError> {
    let mut nodes = Vec::new();
    for deployment in api.get_children(DEPLOYMENTS)? {
        let mut clusters = api.get_children(&child_path(&deployment.path, "clusters"))?;
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        for cluster in clusters {
            for node in api.get_children(&child_path(&cluster.path, "nodes"))? {
                let hostname = node.property("hostname").unwrap_or(&node.id).to_string();
                debug!(cluster = %cluster.id, system = %node.id, hostname = %hostname, "cluster node");
                nodes.push(ClusterNode {
                    cluster: cluster.id.clone(),
                    system: node.id,
                    hostname,
                });
            }
        }
    }
    Ok(nodes)
}

pub fn system_path(system: &str) -> String {
    format!("/infrastructure/systems/{system}_system")
}

pub fn bmc_path(system: &str) -> String {
    child_path(&system_path(system), "bmc")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bmc {
    pub ipaddress: String,
    pub username: Option<String>,
    pub password_key: Option<String>,
    pub state: Option<ItemState>,
}

impl From<ModelItem> for Bmc {
    fn from(item: ModelItem) -> Self {
        Self {
            ipaddress: item.property("ipaddress").unwrap_or_default().to_string(),
            username: item.property("username").map(str::to_string),
            password_key: item.property("password_key").map(str::to_string),
            state: item.state,
        }
    }
}

fn is_absent(err: &LitpError) -> bool {
    err.is_not_found() || err.has_message_type(INVALID_LOCATION)
}

/// The system's `bmc` item, or `None` if it has been removed.
pub fn read_bmc(api: &dyn ModelApi, system: &str) -> Result<Option<Bmc>, LitpError> {
    match api.get(&bmc_path(system)) {
        Ok(item) => Ok(Some(item.into())),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn delete_bmc(api: &dyn ModelApi, system: &str) -> Result<bool, LitpError> {
    api.delete(&bmc_path(system))
}

pub fn create_bmc(
    api: &dyn ModelApi,
    system: &str,
    ipaddress: &str,
    username: &str,
    password_key: &str,
) -> Result<ModelItem, LitpError> {
    let properties = Properties::from([
        ("ipaddress".to_string(), ipaddress.to_string()),
        ("username".to_string(), username.to_string()),
        ("password_key".to_string(), password_key.to_string()),
    ]);
    api.create(&system_path(system), "bmc", "bmc", &properties)
}
