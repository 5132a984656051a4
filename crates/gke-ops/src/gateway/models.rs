//! Compute Engine and Kubernetes Engine REST request and response models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Operations
// ============================================================================

/// Compute Engine operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOperation {
    /// Operation name.
    pub name: String,
    /// PENDING, RUNNING or DONE.
    pub status: String,
    /// Set when a DONE operation failed.
    pub error: Option<ComputeOperationError>,
}

/// Compute operation error.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeOperationError {
    #[serde(default)]
    pub errors: Vec<ComputeOperationErrorDetail>,
}

/// Compute operation error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeOperationErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ComputeOperationError {
    /// Join every detail into one line.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match (&e.code, &e.message) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (None, Some(msg)) => msg.clone(),
                (Some(code), None) => code.clone(),
                (None, None) => "unknown error".to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Kubernetes Engine operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOperation {
    /// Operation name.
    pub name: String,
    /// STATUS_UNSPECIFIED, PENDING, RUNNING, DONE or ABORTING.
    #[serde(default)]
    pub status: String,
    /// Human-readable status detail.
    pub status_message: Option<String>,
    /// Set when the operation failed.
    pub error: Option<ContainerStatus>,
}

/// `google.rpc.Status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    pub code: Option<i32>,
    pub message: Option<String>,
}

// ============================================================================
// Networks
// ============================================================================

/// Network insert body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInsert {
    pub name: String,
    pub auto_create_subnetworks: bool,
    pub routing_config: RoutingConfig,
}

/// Network routing mode.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub routing_mode: String,
}

/// Subnetwork insert body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetworkInsert {
    pub name: String,
    /// Network URL.
    pub network: String,
    pub ip_cidr_range: String,
    pub private_ip_google_access: bool,
    pub log_config: SubnetworkLogConfig,
}

/// Flow log toggle.
#[derive(Debug, Serialize)]
pub struct SubnetworkLogConfig {
    pub enable: bool,
}

// ============================================================================
// Instances
// ============================================================================

/// Compute Engine instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GceInstance {
    /// Instance name.
    pub name: String,
    /// Zone (URL).
    pub zone: String,
    /// Status.
    #[serde(default)]
    pub status: String,
    /// Network interfaces.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

/// Instance network interface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Private IP.
    #[serde(rename = "networkIP")]
    pub network_ip: Option<String>,
    /// Access configs.
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

/// Instance access config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Public IP.
    #[serde(rename = "natIP")]
    pub nat_ip: Option<String>,
}

/// Instance insert body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInsert {
    pub name: String,
    /// Machine type (relative URL).
    pub machine_type: String,
    pub description: String,
    pub tags: Tags,
    pub disks: Vec<AttachedDiskDefinition>,
    pub network_interfaces: Vec<NetworkInterfaceDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
}

/// Network tags.
#[derive(Debug, Serialize)]
pub struct Tags {
    pub items: Vec<String>,
}

/// Attached disk definition for creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskDefinition {
    pub boot: bool,
    pub auto_delete: bool,
    pub initialize_params: InitializeParams,
}

/// Disk initialization parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub source_image: String,
    pub disk_size_gb: String,
    pub disk_type: String,
}

/// Network interface definition for creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceDefinition {
    /// Subnetwork (URL).
    pub subnetwork: String,
    pub access_configs: Vec<AccessConfigDefinition>,
}

/// Access config definition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigDefinition {
    #[serde(rename = "type")]
    pub access_type: String,
    pub name: String,
    pub network_tier: String,
}

/// Metadata for instance.
#[derive(Debug, Serialize)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

/// Metadata item.
#[derive(Debug, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

/// Service account attached to an instance.
#[derive(Debug, Serialize)]
pub struct ServiceAccount {
    pub email: String,
    pub scopes: Vec<String>,
}

/// `instances.aggregatedList` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAggregatedList {
    #[serde(default)]
    pub items: HashMap<String, InstancesScopedList>,
    pub next_page_token: Option<String>,
}

/// Instances of one zone in an aggregated list.
#[derive(Debug, Deserialize)]
pub struct InstancesScopedList {
    #[serde(default)]
    pub instances: Vec<GceInstance>,
}

/// Zone.
#[derive(Debug, Deserialize)]
pub struct Zone {
    pub name: String,
}

/// `zones.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneList {
    #[serde(default)]
    pub items: Vec<Zone>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Firewalls
// ============================================================================

/// Firewall insert body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallInsert {
    pub name: String,
    /// Network URL.
    pub network: String,
    pub direction: String,
    pub allowed: Vec<FirewallAllowed>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

/// Allowed protocol and ports.
#[derive(Debug, Serialize)]
pub struct FirewallAllowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub ports: Vec<String>,
}

/// Firewall rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallResource {
    pub name: String,
    pub network: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub source_ranges: Vec<String>,
}

/// `firewalls.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallList {
    #[serde(default)]
    pub items: Vec<FirewallResource>,
    pub next_page_token: Option<String>,
}

/// Any named resource, for `get`-based existence checks.
#[derive(Debug, Deserialize)]
pub struct NamedResource {
    pub name: String,
}

// ============================================================================
// Clusters
// ============================================================================

/// GKE cluster summary.
#[derive(Debug, Clone, Deserialize)]
pub struct GkeClusterSummary {
    pub name: String,
}

/// Cluster list response.
#[derive(Debug, Deserialize)]
pub struct ClusterListResponse {
    #[serde(default)]
    pub clusters: Vec<GkeClusterSummary>,
}

// ============================================================================
// Paging
// ============================================================================

/// A list response that may continue on another page.
pub trait Paged {
    type Item;

    /// Items on this page and the token for the next one.
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Paged for ZoneList {
    type Item = Zone;

    fn into_parts(self) -> (Vec<Zone>, Option<String>) {
        (self.items, self.next_page_token)
    }
}

impl Paged for FirewallList {
    type Item = FirewallResource;

    fn into_parts(self) -> (Vec<FirewallResource>, Option<String>) {
        (self.items, self.next_page_token)
    }
}

impl Paged for InstanceAggregatedList {
    type Item = GceInstance;

    fn into_parts(self) -> (Vec<GceInstance>, Option<String>) {
        let instances = self
            .items
            .into_values()
            .flat_map(|scoped| scoped.instances)
            .collect();
        (instances, self.next_page_token)
    }
}
