//! Cluster-create request built from a [`ClusterSpec`].
//!
//! Optional blocks are `Option`s that are skipped when serializing, so the
//! request only carries `autoscaling` and `privateClusterConfig` when the
//! spec asks for them.

use serde::Serialize;

use crate::cluster::{ClusterSpec, WorkerGroupSpec};
use crate::names;

const LOGGING_SERVICE: &str = "logging.googleapis.com/kubernetes";
const MONITORING_SERVICE: &str = "monitoring.googleapis.com/kubernetes";
const SERVICE_DISABLED: &str = "none";

/// Body of `projects.locations.clusters.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    /// `projects/{project}/locations/{region}`.
    pub parent: String,
    /// Cluster definition.
    pub cluster: ClusterDefinition,
}

/// Cluster definition for creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDefinition {
    pub name: String,
    pub initial_cluster_version: String,
    pub ip_allocation_policy: IpAllocationPolicy,
    pub logging_service: String,
    pub monitoring_service: String,
    /// Full network resource path.
    pub network: String,
    /// Full subnetwork resource path.
    pub subnetwork: String,
    pub cluster_telemetry: ClusterTelemetry,
    pub node_pools: Vec<NodePoolDefinition>,
    pub master_authorized_networks_config: MasterAuthorizedNetworksConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_cluster_config: Option<PrivateClusterConfig>,
}

/// VPC-native addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocationPolicy {
    pub use_ip_aliases: bool,
    pub create_subnetwork: bool,
}

/// Cluster telemetry setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterTelemetry {
    #[serde(rename = "type")]
    pub telemetry_type: String,
}

/// Node pool definition for creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolDefinition {
    pub name: String,
    pub initial_node_count: u32,
    pub config: NodeConfigDefinition,
    pub management: NodeManagement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<NodePoolAutoscaling>,
}

/// Node config for creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigDefinition {
    pub machine_type: String,
    pub oauth_scopes: Vec<String>,
}

/// Node auto-upgrade / auto-repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeManagement {
    pub auto_upgrade: bool,
    pub auto_repair: bool,
}

/// Autoscaler bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolAutoscaling {
    pub enabled: bool,
    pub min_node_count: u32,
    pub max_node_count: u32,
}

/// Master authorized networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAuthorizedNetworksConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<CidrBlockEntry>,
}

/// One authorized range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CidrBlockEntry {
    pub display_name: String,
    pub cidr_block: String,
}

/// Private cluster settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateClusterConfig {
    pub enable_private_nodes: bool,
    pub enable_private_endpoint: bool,
    pub master_ipv4_cidr_block: String,
}

/// `projects/{project}/locations/{region}`.
#[must_use]
pub fn location_path(project: &str, region: &str) -> String {
    format!("projects/{project}/locations/{region}")
}

/// `projects/{project}/locations/{region}/clusters/{name}`.
#[must_use]
pub fn cluster_path(project: &str, region: &str, name: &str) -> String {
    format!("{}/clusters/{name}", location_path(project, region))
}

/// Build the create request for `spec`.
#[must_use]
pub fn build_create_request(spec: &ClusterSpec) -> CreateClusterRequest {
    let project = &spec.project_id;
    let (logging_service, monitoring_service) = if spec.enable_stackdriver {
        (LOGGING_SERVICE, MONITORING_SERVICE)
    } else {
        (SERVICE_DISABLED, SERVICE_DISABLED)
    };

    let node_pools = spec
        .workers
        .iter()
        .enumerate()
        .map(|(index, worker)| node_pool(&spec.name, index, worker))
        .collect();

    let private_cluster_config = spec.enable_private_nodes.then(|| PrivateClusterConfig {
        enable_private_nodes: true,
        enable_private_endpoint: true,
        master_ipv4_cidr_block: spec.master_cidr_block.to_string(),
    });

    CreateClusterRequest {
        parent: location_path(project, &spec.region),
        cluster: ClusterDefinition {
            name: spec.name.clone(),
            initial_cluster_version: "latest".to_string(),
            ip_allocation_policy: IpAllocationPolicy {
                use_ip_aliases: true,
                create_subnetwork: false,
            },
            logging_service: logging_service.to_string(),
            monitoring_service: monitoring_service.to_string(),
            network: format!("projects/{project}/global/networks/{}", spec.network),
            subnetwork: format!(
                "projects/{project}/regions/{}/subnetworks/{}",
                spec.region, spec.subnetwork
            ),
            cluster_telemetry: ClusterTelemetry {
                telemetry_type: "DISABLED".to_string(),
            },
            node_pools,
            master_authorized_networks_config: MasterAuthorizedNetworksConfig {
                enabled: spec.master_authorized_networks.enabled,
                cidr_blocks: spec
                    .master_authorized_networks
                    .cidr_blocks
                    .iter()
                    .map(|c| CidrBlockEntry {
                        display_name: c.display_name.clone(),
                        cidr_block: c.cidr_block.to_string(),
                    })
                    .collect(),
            },
            private_cluster_config,
        },
    }
}

fn node_pool(cluster: &str, index: usize, worker: &WorkerGroupSpec) -> NodePoolDefinition {
    let autoscaling = worker.autoscaling.then(|| NodePoolAutoscaling {
        enabled: true,
        min_node_count: worker.min_nodes.unwrap_or(worker.desired_nodes),
        max_node_count: worker.max_nodes.unwrap_or(worker.desired_nodes),
    });

    NodePoolDefinition {
        name: names::node_pool(cluster, index),
        initial_node_count: worker.desired_nodes,
        config: NodeConfigDefinition {
            machine_type: worker.machine_type.clone(),
            oauth_scopes: worker.oauth_scopes.clone(),
        },
        management: NodeManagement {
            auto_upgrade: true,
            auto_repair: true,
        },
        autoscaling,
    }
}
