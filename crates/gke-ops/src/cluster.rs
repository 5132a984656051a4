//! Cluster description built before orchestration starts.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::cidr::DEFAULT_MASTER_BLOCK;
use crate::error::ProvisionError;
use crate::names;

/// Longest cluster name that still leaves room for derived resource names.
const MAX_NAME_LEN: usize = 40;

/// Where the cluster's nodes are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum NetworkMode {
    /// The project's `default` network and subnetwork.
    #[default]
    Default,
    /// An existing network and subnetwork, selected by name.
    Existing { network: String, subnetwork: String },
    /// A dedicated network and private subnetwork created for the cluster.
    Custom,
}

impl NetworkMode {
    /// Network and subnetwork names this mode resolves to.
    #[must_use]
    pub fn resolve(&self, cluster: &str) -> (String, String) {
        match self {
            Self::Default => ("default".to_string(), "default".to_string()),
            Self::Existing {
                network,
                subnetwork,
            } => (network.clone(), subnetwork.clone()),
            Self::Custom => (names::network(cluster), names::private_subnetwork(cluster)),
        }
    }
}

/// One worker group, turned into one node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGroupSpec {
    /// Machine type, e.g. `e2-standard-4`.
    pub machine_type: String,
    /// Initial node count per zone.
    pub desired_nodes: u32,
    /// Autoscaler lower bound.
    #[serde(default)]
    pub min_nodes: Option<u32>,
    /// Autoscaler upper bound.
    #[serde(default)]
    pub max_nodes: Option<u32>,
    /// Whether the autoscaler is enabled for this group.
    #[serde(default)]
    pub autoscaling: bool,
    /// OAuth scopes granted to the nodes.
    #[serde(default = "scopes::default_scopes")]
    pub oauth_scopes: Vec<String>,
}

impl WorkerGroupSpec {
    /// Group with a fixed node count.
    #[must_use]
    pub fn fixed(machine_type: impl Into<String>, nodes: u32, oauth_scopes: Vec<String>) -> Self {
        Self {
            machine_type: machine_type.into(),
            desired_nodes: nodes,
            min_nodes: None,
            max_nodes: None,
            autoscaling: false,
            oauth_scopes,
        }
    }

    /// Autoscaled group that starts at its minimum size.
    #[must_use]
    pub fn autoscaled(
        machine_type: impl Into<String>,
        min: u32,
        max: u32,
        oauth_scopes: Vec<String>,
    ) -> Self {
        Self {
            machine_type: machine_type.into(),
            desired_nodes: min,
            min_nodes: Some(min),
            max_nodes: Some(max),
            autoscaling: true,
            oauth_scopes,
        }
    }

    fn validate(&self, index: usize) -> Result<(), ProvisionError> {
        if self.machine_type.trim().is_empty() {
            return Err(ProvisionError::InvalidSpec(format!(
                "worker group {index} has no machine type"
            )));
        }
        if self.autoscaling {
            match (self.min_nodes, self.max_nodes) {
                (Some(min), Some(max)) if min <= max && max > 0 => {}
                _ => {
                    return Err(ProvisionError::InvalidSpec(format!(
                        "worker group {index} needs autoscaling bounds with min <= max"
                    )))
                }
            }
        } else if self.desired_nodes == 0 {
            return Err(ProvisionError::InvalidSpec(format!(
                "worker group {index} needs at least one node"
            )));
        }
        Ok(())
    }
}

/// An address range allowed to reach the master endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedCidr {
    pub display_name: String,
    pub cidr_block: Ipv4Net,
}

/// Master authorized networks setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MasterAuthorizedNetworks {
    pub enabled: bool,
    #[serde(default)]
    pub cidr_blocks: Vec<AuthorizedCidr>,
}

/// Everything needed to create one cluster.
///
/// The orchestrator treats this as read-only input except for
/// [`ClusterSpec::authorize_bastion`], which it applies once the bastion's
/// address is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Project that owns every resource.
    pub project_id: String,
    /// Cluster name.
    pub name: String,
    /// Region the cluster and its resources live in.
    pub region: String,
    /// Whether the network and subnetwork are created for this cluster.
    pub custom_network: bool,
    /// Network name.
    pub network: String,
    /// Subnetwork name.
    pub subnetwork: String,
    /// Nodes and master endpoint are internal-only.
    pub enable_private_nodes: bool,
    /// /28 range for the masters.
    pub master_cidr_block: Ipv4Net,
    /// Networks allowed to reach the master.
    pub master_authorized_networks: MasterAuthorizedNetworks,
    /// Worker groups in node pool order.
    pub workers: Vec<WorkerGroupSpec>,
    /// Send logs and metrics to Cloud Logging / Monitoring.
    pub enable_stackdriver: bool,
}

impl ClusterSpec {
    /// Public cluster with no worker groups yet.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        network: &NetworkMode,
    ) -> Self {
        let name = name.into();
        let (network_name, subnetwork_name) = network.resolve(&name);
        Self {
            project_id: project_id.into(),
            name,
            region: region.into(),
            custom_network: matches!(network, NetworkMode::Custom),
            network: network_name,
            subnetwork: subnetwork_name,
            enable_private_nodes: false,
            master_cidr_block: DEFAULT_MASTER_BLOCK,
            master_authorized_networks: MasterAuthorizedNetworks::default(),
            workers: Vec::new(),
            enable_stackdriver: false,
        }
    }

    /// Make the cluster private with the given master range.
    #[must_use]
    pub fn with_private_nodes(mut self, master_cidr_block: Ipv4Net) -> Self {
        self.enable_private_nodes = true;
        self.master_cidr_block = master_cidr_block;
        self.master_authorized_networks.enabled = true;
        self
    }

    /// Append a worker group.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerGroupSpec) -> Self {
        self.workers.push(worker);
        self
    }

    /// Toggle Cloud Logging / Monitoring.
    #[must_use]
    pub fn with_stackdriver(mut self, enabled: bool) -> Self {
        self.enable_stackdriver = enabled;
        self
    }

    /// Allow the bastion's private address to reach the master.
    #[must_use]
    pub fn authorize_bastion(mut self, address: Ipv4Addr) -> Self {
        self.master_authorized_networks = MasterAuthorizedNetworks {
            enabled: true,
            cidr_blocks: vec![AuthorizedCidr {
                display_name: "bastion".to_string(),
                cidr_block: Ipv4Net::from(address),
            }],
        };
        self
    }

    /// Node pool names in worker group order.
    #[must_use]
    pub fn node_pool_names(&self) -> Vec<String> {
        (0..self.workers.len())
            .map(|i| names::node_pool(&self.name, i))
            .collect()
    }

    /// Reject specs the provider would refuse outright.
    ///
    /// # Errors
    /// Returns [`ProvisionError::InvalidSpec`] describing the first problem.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        validate_name(&self.name)?;
        if self.project_id.is_empty() || self.region.is_empty() {
            return Err(ProvisionError::InvalidSpec(
                "project and region are required".to_string(),
            ));
        }
        if self.workers.is_empty() {
            return Err(ProvisionError::InvalidSpec(
                "at least one worker group is required".to_string(),
            ));
        }
        for (index, worker) in self.workers.iter().enumerate() {
            worker.validate(index)?;
        }
        Ok(())
    }
}

/// Check a cluster name against the provider's naming rules.
///
/// # Errors
/// Returns [`ProvisionError::InvalidSpec`] explaining the rule.
pub fn validate_name(name: &str) -> Result<(), ProvisionError> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidSpec(format!(
            "cluster name `{name}` must start with a letter and contain only lowercase letters, digits and hyphens (max {MAX_NAME_LEN})"
        )))
    }
}

/// OAuth scope sets offered for worker nodes.
pub mod scopes {
    /// Scope granting access to every Cloud API.
    pub const FULL: (&str, &str) = (
        "All Cloud APIs",
        "https://www.googleapis.com/auth/cloud-platform",
    );

    /// Scopes GKE enables by default.
    pub const DEFAULT: &[(&str, &str)] = &[
        (
            "Storage - Read Only [Default]",
            "https://www.googleapis.com/auth/devstorage.read_only",
        ),
        (
            "Logging - Write [Default]",
            "https://www.googleapis.com/auth/logging.write",
        ),
        (
            "Monitoring [Default]",
            "https://www.googleapis.com/auth/monitoring",
        ),
        (
            "Service Control [Default]",
            "https://www.googleapis.com/auth/servicecontrol",
        ),
        (
            "Service Management - Read Only [Default]",
            "https://www.googleapis.com/auth/service.management.readonly",
        ),
        (
            "Stackdriver Trace - Write Only [Default]",
            "https://www.googleapis.com/auth/trace.append",
        ),
    ];

    /// Additional scopes an operator may pick on top of the defaults.
    pub const CUSTOM: &[(&str, &str)] = &[
        ("User Info", "https://www.googleapis.com/auth/userinfo.email"),
        (
            "Compute Engine - Read Only",
            "https://www.googleapis.com/auth/compute.readonly",
        ),
        (
            "Compute Engine - Read Write",
            "https://www.googleapis.com/auth/compute",
        ),
        (
            "Storage - Write Only",
            "https://www.googleapis.com/auth/devstorage.write_only",
        ),
        (
            "Storage - Read Write",
            "https://www.googleapis.com/auth/devstorage.read_write",
        ),
        (
            "Storage - Full",
            "https://www.googleapis.com/auth/devstorage.full_control",
        ),
        ("Task Queue", "https://www.googleapis.com/auth/taskqueue"),
        ("BigQuery", "https://www.googleapis.com/auth/bigquery"),
        ("Cloud SQL", "https://www.googleapis.com/auth/sqlservice.admin"),
        ("Cloud Datastore", "https://www.googleapis.com/auth/datastore"),
        ("Logging - Read", "https://www.googleapis.com/auth/logging.read"),
        ("Logging - Full", "https://www.googleapis.com/auth/logging.admin"),
        (
            "Bigtable Data - Read Only",
            "https://www.googleapis.com/auth/bigtable.data.readonly",
        ),
        (
            "Bigtable Data - Read Write",
            "https://www.googleapis.com/auth/bigtable.data",
        ),
        (
            "Bigtable Admin - Tables Only",
            "https://www.googleapis.com/auth/bigtable.admin.table",
        ),
        (
            "Bigtable Admin - Full",
            "https://www.googleapis.com/auth/bigtable.admin",
        ),
        ("Cloud Pub/Sub", "https://www.googleapis.com/auth/pubsub"),
        (
            "Service Management - Read Write",
            "https://www.googleapis.com/auth/service.management",
        ),
        (
            "Stackdriver Trace - Read Only",
            "https://www.googleapis.com/auth/trace.readonly",
        ),
        (
            "Cloud Source Repositories - Read Only",
            "https://www.googleapis.com/auth/source.read_only",
        ),
        (
            "Cloud Source Repositories - Read Write",
            "https://www.googleapis.com/auth/source.read_write",
        ),
        (
            "Cloud Source Repositories - Full Control",
            "https://www.googleapis.com/auth/source.full_control",
        ),
        (
            "Cloud Debugger",
            "https://www.googleapis.com/auth/cloud_debugger",
        ),
    ];

    /// The default GKE scope URLs.
    #[must_use]
    pub fn default_scopes() -> Vec<String> {
        DEFAULT.iter().map(|(_, url)| (*url).to_string()).collect()
    }

    /// The single full-access scope URL.
    #[must_use]
    pub fn full_scopes() -> Vec<String> {
        vec![FULL.1.to_string()]
    }

    /// Chosen custom scope URLs followed by the defaults.
    #[must_use]
    pub fn custom_scopes(extra: &[&str]) -> Vec<String> {
        extra
            .iter()
            .map(|s| (*s).to_string())
            .chain(default_scopes())
            .collect()
    }

    /// Human label for a scope URL.
    #[must_use]
    pub fn label(url: &str) -> Option<&'static str> {
        std::iter::once(&FULL)
            .chain(DEFAULT.iter())
            .chain(CUSTOM.iter())
            .find(|(_, u)| *u == url)
            .map(|(label, _)| *label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: &NetworkMode) -> ClusterSpec {
        ClusterSpec::new("my-project", "demo", "us-central1", mode)
            .with_worker(WorkerGroupSpec::fixed("e2-standard-4", 1, scopes::default_scopes()))
    }

    #[test]
    fn test_custom_network_names() {
        let spec = spec(&NetworkMode::Custom);
        assert!(spec.custom_network);
        assert_eq!(spec.network, "gke-ops-demo-network");
        assert_eq!(spec.subnetwork, "gke-ops-demo-network-private-subnet");
    }

    #[test]
    fn test_existing_and_default_network() {
        let existing = spec(&NetworkMode::Existing {
            network: "shared".into(),
            subnetwork: "shared-us".into(),
        });
        assert!(!existing.custom_network);
        assert_eq!(existing.network, "shared");
        assert_eq!(existing.subnetwork, "shared-us");

        let default = spec(&NetworkMode::Default);
        assert_eq!(default.network, "default");
        assert_eq!(default.subnetwork, "default");
    }

    #[test]
    fn test_authorize_bastion_sets_host_route() {
        let spec = spec(&NetworkMode::Custom)
            .with_private_nodes("172.16.0.16/28".parse().unwrap())
            .authorize_bastion(Ipv4Addr::new(10, 0, 0, 2));
        let blocks = &spec.master_authorized_networks.cidr_blocks;
        assert!(spec.master_authorized_networks.enabled);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].display_name, "bastion");
        assert_eq!(blocks[0].cidr_block.to_string(), "10.0.0.2/32");
        assert_eq!(spec.master_cidr_block.to_string(), "172.16.0.16/28");
    }

    #[test]
    fn test_node_pool_names_are_unique() {
        let spec = spec(&NetworkMode::Default)
            .with_worker(WorkerGroupSpec::autoscaled("e2-small", 1, 3, scopes::full_scopes()));
        assert_eq!(spec.node_pool_names(), vec!["demo-np-0", "demo-np-1"]);
    }

    #[test]
    fn test_validate() {
        assert!(spec(&NetworkMode::Default).validate().is_ok());

        let mut bad_name = spec(&NetworkMode::Default);
        bad_name.name = "Demo_Cluster".into();
        assert!(bad_name.validate().is_err());

        let no_workers = ClusterSpec::new("p", "demo", "us-central1", &NetworkMode::Default);
        assert!(no_workers.validate().is_err());

        let inverted = spec(&NetworkMode::Default)
            .with_worker(WorkerGroupSpec::autoscaled("e2-small", 5, 2, vec![]));
        assert!(inverted.validate().is_err());

        let empty = spec(&NetworkMode::Default)
            .with_worker(WorkerGroupSpec::fixed("e2-small", 0, vec![]));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_scope_sets() {
        assert_eq!(scopes::default_scopes().len(), 6);
        let custom = scopes::custom_scopes(&["https://www.googleapis.com/auth/bigquery"]);
        assert_eq!(custom.len(), 7);
        assert_eq!(custom[0], "https://www.googleapis.com/auth/bigquery");
        assert_eq!(
            scopes::label("https://www.googleapis.com/auth/cloud-platform"),
            Some("All Cloud APIs")
        );
        assert_eq!(scopes::label("https://example.com"), None);
    }
}
