//! Provider calls consumed by the orchestrators.
//!
//! [`ResourceGateway`] is the only way the core touches the cloud. The
//! production implementation is [`gcp::Gcp`], which talks to the Compute and
//! Kubernetes Engine REST APIs and shells out to `gcloud` for routers and NAT.

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::request::CreateClusterRequest;

#[cfg(test)]
pub(crate) mod fake;
pub mod gcloud;
pub mod gcp;
mod models;

pub use gcloud::GcloudCli;
pub use gcp::Gcp;

// ============================================================================
// Long-running operations
// ============================================================================

/// Which API an operation belongs to, and where to poll it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationScope {
    /// Kubernetes Engine operation in a location.
    Container { project: String, location: String },
    /// Global Compute Engine operation (networks, firewalls).
    ComputeGlobal { project: String },
    /// Regional Compute Engine operation (subnetworks).
    ComputeRegion { project: String, region: String },
    /// Zonal Compute Engine operation (instances).
    ComputeZone { project: String, zone: String },
}

/// Opaque reference to a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Provider-assigned operation name.
    pub name: String,
    /// Where the operation can be queried.
    pub scope: OperationScope,
}

impl OperationHandle {
    /// Kubernetes Engine operation.
    #[must_use]
    pub fn container(name: impl Into<String>, project: &str, location: &str) -> Self {
        Self {
            name: name.into(),
            scope: OperationScope::Container {
                project: project.to_string(),
                location: location.to_string(),
            },
        }
    }

    /// Resource path of the operation, relative to its API root.
    #[must_use]
    pub fn path(&self) -> String {
        match &self.scope {
            OperationScope::Container { project, location } => {
                format!("projects/{project}/locations/{location}/operations/{}", self.name)
            }
            OperationScope::ComputeGlobal { project } => {
                format!("projects/{project}/global/operations/{}", self.name)
            }
            OperationScope::ComputeRegion { project, region } => {
                format!("projects/{project}/regions/{region}/operations/{}", self.name)
            }
            OperationScope::ComputeZone { project, zone } => {
                format!("projects/{project}/zones/{zone}/operations/{}", self.name)
            }
        }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Status reported for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Unspecified,
    Pending,
    Running,
    Done,
    Aborting,
    /// Anything the provider reports that is not listed above.
    Unknown(String),
}

impl OperationStatus {
    /// Map a provider status string.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "STATUS_UNSPECIFIED" => Self::Unspecified,
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            "ABORTING" => Self::Aborting,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "STATUS_UNSPECIFIED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Done => write!(f, "DONE"),
            Self::Aborting => write!(f, "ABORTING"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// One status query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub status: OperationStatus,
    /// Error detail attached by the provider, if any.
    pub error: Option<String>,
}

impl OperationSnapshot {
    #[must_use]
    pub fn new(status: OperationStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A VPC network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub self_link: Option<String>,
}

/// A subnetwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnetwork {
    pub name: String,
    pub region: String,
    pub ip_cidr_range: Option<String>,
}

/// A VM instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Zone name, not URL.
    pub zone: String,
    pub status: String,
    pub private_ip: Option<Ipv4Addr>,
    pub public_ip: Option<String>,
}

/// A firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub network: Option<String>,
}

/// Options for a new network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    pub auto_create_subnetworks: bool,
    pub routing_mode: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            auto_create_subnetworks: false,
            routing_mode: "REGIONAL".to_string(),
        }
    }
}

/// Options for a new subnetwork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetworkOptions {
    pub private_ip_google_access: bool,
    pub enable_flow_logs: bool,
}

impl Default for SubnetworkOptions {
    fn default() -> Self {
        Self {
            private_ip_google_access: true,
            enable_flow_logs: false,
        }
    }
}

/// Definition of a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub machine_type: String,
    pub source_image: String,
    pub disk_size_gb: u32,
    /// Full subnetwork resource path.
    pub subnetwork: String,
    pub tags: Vec<String>,
    pub startup_script: Option<String>,
    pub description: String,
    pub service_account_email: Option<String>,
}

/// Definition of a new ingress firewall rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallSpec {
    /// Full network resource path.
    pub network: String,
    pub tcp_ports: Vec<u16>,
    pub source_ranges: Vec<Ipv4Net>,
    pub target_tags: Vec<String>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Provider operations needed to create and destroy a cluster.
///
/// Create and delete calls for Compute Engine resources and clusters return
/// an [`OperationHandle`] that the caller awaits with the
/// [`OperationPoller`](crate::poller::OperationPoller). Router and NAT calls
/// complete before returning.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    // ========================================================================
    // Networks
    // ========================================================================

    /// Create a VPC network.
    async fn create_network(
        &self,
        name: &str,
        opts: &NetworkOptions,
    ) -> Result<(Network, OperationHandle), GatewayError>;

    /// Delete a VPC network.
    async fn delete_network(&self, name: &str) -> Result<OperationHandle, GatewayError>;

    /// Whether a network exists.
    async fn network_exists(&self, name: &str) -> Result<bool, GatewayError>;

    /// Create a subnetwork in `network`.
    async fn create_subnetwork(
        &self,
        network: &str,
        name: &str,
        region: &str,
        cidr: Ipv4Net,
        opts: &SubnetworkOptions,
    ) -> Result<(Subnetwork, OperationHandle), GatewayError>;

    /// Delete a subnetwork.
    async fn delete_subnetwork(
        &self,
        region: &str,
        name: &str,
    ) -> Result<OperationHandle, GatewayError>;

    /// Whether a subnetwork exists.
    async fn subnetwork_exists(&self, region: &str, name: &str) -> Result<bool, GatewayError>;

    // ========================================================================
    // Instances
    // ========================================================================

    /// Zone names in `region`, sorted.
    async fn list_zones(&self, region: &str) -> Result<Vec<String>, GatewayError>;

    /// Create an instance.
    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        spec: &InstanceSpec,
    ) -> Result<(Instance, OperationHandle), GatewayError>;

    /// Read an instance.
    async fn get_instance(&self, zone: &str, name: &str) -> Result<Instance, GatewayError>;

    /// Delete an instance.
    async fn delete_instance(&self, zone: &str, name: &str)
        -> Result<OperationHandle, GatewayError>;

    /// Instances in any zone whose name matches `pattern` (an RE2 regex).
    async fn list_instances_by_name_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<Instance>, GatewayError>;

    // ========================================================================
    // Firewall rules
    // ========================================================================

    /// Create a firewall rule.
    async fn create_firewall_rule(
        &self,
        name: &str,
        spec: &FirewallSpec,
    ) -> Result<(FirewallRule, OperationHandle), GatewayError>;

    /// Delete a firewall rule.
    async fn delete_firewall_rule(&self, name: &str) -> Result<OperationHandle, GatewayError>;

    /// Whether a firewall rule exists.
    async fn firewall_exists(&self, name: &str) -> Result<bool, GatewayError>;

    /// Source ranges of the enabled ingress rules GKE creates for private
    /// masters. Best-effort: masters created outside GKE are not detected.
    async fn list_master_source_ranges(&self) -> Result<Vec<String>, GatewayError>;

    // ========================================================================
    // Routers and NAT (CLI-backed)
    // ========================================================================

    /// Point the CLI at the service account and project.
    async fn authenticate_cli(&self, project: &str) -> Result<(), GatewayError>;

    /// Create a cloud router.
    async fn create_router(&self, name: &str, network: &str, region: &str)
        -> Result<(), GatewayError>;

    /// Delete a cloud router.
    async fn delete_router(&self, name: &str, region: &str) -> Result<(), GatewayError>;

    /// Whether a cloud router exists.
    async fn router_exists(&self, name: &str, region: &str) -> Result<bool, GatewayError>;

    /// Create a cloud NAT on `router`.
    async fn create_nat(&self, name: &str, router: &str, region: &str)
        -> Result<(), GatewayError>;

    /// Delete a cloud NAT.
    async fn delete_nat(&self, name: &str, router: &str, region: &str)
        -> Result<(), GatewayError>;

    /// Whether a cloud NAT exists.
    async fn nat_exists(&self, name: &str, router: &str, region: &str)
        -> Result<bool, GatewayError>;

    // ========================================================================
    // Clusters
    // ========================================================================

    /// Submit a cluster-create request.
    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<OperationHandle, GatewayError>;

    /// Delete the cluster at `path`.
    async fn delete_cluster(&self, path: &str) -> Result<OperationHandle, GatewayError>;

    /// Names of the clusters under `parent`, sorted.
    async fn list_cluster_names(&self, parent: &str) -> Result<Vec<String>, GatewayError>;

    /// Current status of an operation.
    async fn get_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationSnapshot, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_paths() {
        let op = OperationHandle::container("operation-1", "p", "us-central1");
        assert_eq!(op.path(), "projects/p/locations/us-central1/operations/operation-1");

        let zonal = OperationHandle {
            name: "op-2".into(),
            scope: OperationScope::ComputeZone {
                project: "p".into(),
                zone: "us-central1-a".into(),
            },
        };
        assert_eq!(zonal.path(), "projects/p/zones/us-central1-a/operations/op-2");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OperationStatus::from_provider("DONE"), OperationStatus::Done);
        assert_eq!(OperationStatus::from_provider("ABORTING"), OperationStatus::Aborting);
        assert_eq!(
            OperationStatus::from_provider("SOMETHING_NEW"),
            OperationStatus::Unknown("SOMETHING_NEW".into())
        );
        assert_eq!(OperationStatus::Running.to_string(), "RUNNING");
    }
}
