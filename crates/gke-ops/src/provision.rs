//! Cluster provisioning.
//!
//! [`ProvisioningOrchestrator::provision`] runs the creation steps in
//! dependency order and stops at the first failure:
//!
//! 1. custom network and its private subnetwork (only for custom networks)
//! 2. bastion, SSH firewall rule, CLI auth, cloud router and NAT (only for
//!    private clusters)
//! 3. the cluster itself, awaited through the [`OperationPoller`]
//!
//! Every resource the provider accepts is appended to a [`ResourceLog`].
//! [`ProvisioningOrchestrator::create`] wraps the steps and, on failure, asks
//! the [`Operator`] whether to roll back. Rollback walks the log backwards
//! and deletes each entry, treating resources that are already gone as done.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::cidr::{self, DEFAULT_PRIVATE_SUBNET_RANGE};
use crate::cluster::ClusterSpec;
use crate::destroy::{self, DestructionOrchestrator};
use crate::error::{DestroyError, GatewayError, ProvisionError, ProvisionStep};
use crate::gateway::{
    FirewallSpec, InstanceSpec, NetworkOptions, OperationHandle, ResourceGateway,
    SubnetworkOptions,
};
use crate::names;
use crate::operator::Operator;
use crate::poller::OperationPoller;
use crate::request::{build_create_request, location_path};

const BASTION_MACHINE_TYPE: &str = "g1-small";
const BASTION_IMAGE: &str = "projects/debian-cloud/global/images/family/debian-12";
const BASTION_DISK_SIZE_GB: u32 = 10;
const SSH_PORT: u16 = 22;
const ANYWHERE: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0);
const LOCATION_GLOBAL: &str = "global";

// ============================================================================
// Resource log
// ============================================================================

/// Kinds of resource the orchestrator creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnetwork,
    Bastion,
    FirewallRule,
    Router,
    Nat,
    Cluster,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Subnetwork => "subnetwork",
            Self::Bastion => "bastion",
            Self::FirewallRule => "firewall-rule",
            Self::Router => "router",
            Self::Nat => "nat",
            Self::Cluster => "cluster",
        };
        write!(f, "{s}")
    }
}

/// A resource created during one provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedResource {
    pub kind: ResourceKind,
    pub name: String,
    /// Zone for the bastion, region for regional resources, `global` otherwise.
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Resources in the order they were created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceLog {
    entries: Vec<ProvisionedResource>,
}

impl ResourceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, kind: ResourceKind, name: &str, location: &str) {
        info!(kind = %kind, name = %name, location = %location, "Resource created");
        self.entries.push(ProvisionedResource {
            kind,
            name: name.to_string(),
            location: location.to_string(),
            created_at: Utc::now(),
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[ProvisionedResource] {
        &self.entries
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Failure report
// ============================================================================

/// What happened to the created resources after a failure.
#[derive(Debug)]
pub enum RollbackOutcome {
    /// The failure happened before anything was created.
    NothingCreated,
    /// The operator chose to keep the resources.
    Declined,
    /// Everything in the log was deleted.
    Completed,
    /// Some teardown steps failed.
    Incomplete(DestroyError),
}

/// A failed provisioning attempt.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ProvisionFailure {
    /// The step failure that stopped provisioning.
    pub error: ProvisionError,
    /// Resources created before the failure.
    pub created: ResourceLog,
    pub rollback: RollbackOutcome,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Creates clusters and their supporting resources.
pub struct ProvisioningOrchestrator<'a, G: ResourceGateway + ?Sized> {
    gateway: &'a G,
    poller: OperationPoller,
    operator: &'a dyn Operator,
    bastion_service_account: Option<String>,
}

impl<'a, G: ResourceGateway + ?Sized> ProvisioningOrchestrator<'a, G> {
    pub fn new(gateway: &'a G, poller: OperationPoller, operator: &'a dyn Operator) -> Self {
        Self {
            gateway,
            poller,
            operator,
            bastion_service_account: None,
        }
    }

    /// Service account the bastion runs as.
    #[must_use]
    pub fn with_bastion_service_account(mut self, email: Option<String>) -> Self {
        self.bastion_service_account = email;
        self
    }

    /// Provision `spec`, offering a rollback if any step fails.
    ///
    /// Returns the cluster spec as submitted, including the bastion's authorized
    /// network for private clusters.
    ///
    /// # Errors
    /// Returns a [`ProvisionFailure`] carrying the step error, the resources
    /// created before it and the rollback outcome.
    pub async fn create(&self, spec: ClusterSpec) -> Result<ClusterSpec, ProvisionFailure> {
        let mut log = ResourceLog::new();
        let project = spec.project_id.clone();
        let region = spec.region.clone();
        let cluster = spec.name.clone();

        let error = match self.provision(spec, &mut log).await {
            Ok(spec) => return Ok(spec),
            Err(e) => e,
        };
        error!(cluster = %cluster, step = ?error.step(), error = %error, "Provisioning failed");

        let rollback = if log.is_empty() {
            RollbackOutcome::NothingCreated
        } else if self.operator.confirm_rollback(&error, &log) {
            match self.rollback(&project, &cluster, &region, &log).await {
                Ok(()) => RollbackOutcome::Completed,
                Err(e) => RollbackOutcome::Incomplete(e),
            }
        } else {
            info!(cluster = %cluster, resources = log.len(), "Rollback declined, leaving resources in place");
            RollbackOutcome::Declined
        };

        Err(ProvisionFailure {
            error,
            created: log,
            rollback,
        })
    }

    /// Run the creation steps, appending each created resource to `log`.
    ///
    /// # Errors
    /// Returns the first step failure; later steps are not attempted.
    pub async fn provision(
        &self,
        mut spec: ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<ClusterSpec, ProvisionError> {
        spec.validate()?;

        info!(
            cluster = %spec.name,
            project = %spec.project_id,
            region = %spec.region,
            custom_network = spec.custom_network,
            private = spec.enable_private_nodes,
            "Provisioning cluster"
        );

        if spec.custom_network {
            self.create_network(&spec, log).await?;
        }

        if spec.enable_private_nodes {
            let address = self.create_bastion(&spec, log).await?;
            spec = spec.authorize_bastion(address);
            self.create_ssh_firewall_rule(&spec, log).await?;
            self.create_nat_gateway(&spec, log).await?;
        }

        self.create_cluster(&spec, log).await?;
        info!(cluster = %spec.name, "Cluster is ready");
        Ok(spec)
    }

    async fn create_network(
        &self,
        spec: &ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<(), ProvisionError> {
        let network = &spec.network;
        info!(network = %network, "Creating custom network");
        let (_, handle) = self
            .gateway
            .create_network(network, &NetworkOptions::default())
            .await
            .map_err(step_error(ProvisionStep::CreateNetwork, network))?;
        log.record(ResourceKind::Network, network, LOCATION_GLOBAL);
        self.await_step(ProvisionStep::CreateNetwork, network, &handle)
            .await?;

        let subnetwork = &spec.subnetwork;
        info!(subnetwork = %subnetwork, range = %DEFAULT_PRIVATE_SUBNET_RANGE, "Creating private subnetwork");
        let (_, handle) = self
            .gateway
            .create_subnetwork(
                network,
                subnetwork,
                &spec.region,
                DEFAULT_PRIVATE_SUBNET_RANGE,
                &SubnetworkOptions::default(),
            )
            .await
            .map_err(step_error(ProvisionStep::CreateSubnetwork, subnetwork))?;
        log.record(ResourceKind::Subnetwork, subnetwork, &spec.region);
        self.await_step(ProvisionStep::CreateSubnetwork, subnetwork, &handle)
            .await
    }

    /// Create the bastion and return its private address.
    async fn create_bastion(
        &self,
        spec: &ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<Ipv4Addr, ProvisionError> {
        let name = names::bastion(&spec.name);
        let zones = self
            .gateway
            .list_zones(&spec.region)
            .await
            .map_err(step_error(ProvisionStep::CreateBastion, &name))?;
        let zone = zones.into_iter().next().ok_or_else(|| ProvisionError::NoZones {
            region: spec.region.clone(),
        })?;

        info!(bastion = %name, zone = %zone, "Creating bastion");
        let instance_spec = self.bastion_spec(spec, &name);
        let (_, handle) = self
            .gateway
            .create_instance(&zone, &name, &instance_spec)
            .await
            .map_err(step_error(ProvisionStep::CreateBastion, &name))?;
        log.record(ResourceKind::Bastion, &name, &zone);
        self.await_step(ProvisionStep::CreateBastion, &name, &handle)
            .await?;

        let instance = self
            .gateway
            .get_instance(&zone, &name)
            .await
            .map_err(step_error(ProvisionStep::CreateBastion, &name))?;
        let address = instance
            .private_ip
            .ok_or_else(|| ProvisionError::MissingAddress {
                instance: name.clone(),
            })?;
        info!(bastion = %name, private_ip = %address, public_ip = ?instance.public_ip, "Bastion is up");
        Ok(address)
    }

    fn bastion_spec(&self, spec: &ClusterSpec, name: &str) -> InstanceSpec {
        InstanceSpec {
            machine_type: BASTION_MACHINE_TYPE.to_string(),
            source_image: BASTION_IMAGE.to_string(),
            disk_size_gb: BASTION_DISK_SIZE_GB,
            subnetwork: format!(
                "projects/{}/regions/{}/subnetworks/{}",
                spec.project_id, spec.region, spec.subnetwork
            ),
            tags: vec![name.to_string()],
            startup_script: Some(bastion_startup_script(spec)),
            description: format!("Bastion host for GKE cluster {}", spec.name),
            service_account_email: self.bastion_service_account.clone(),
        }
    }

    async fn create_ssh_firewall_rule(
        &self,
        spec: &ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<(), ProvisionError> {
        let name = names::ssh_firewall_rule(&spec.name);
        let firewall = FirewallSpec {
            network: format!("projects/{}/global/networks/{}", spec.project_id, spec.network),
            tcp_ports: vec![SSH_PORT],
            source_ranges: vec![ANYWHERE],
            target_tags: vec![names::bastion(&spec.name)],
        };
        info!(firewall = %name, "Creating SSH firewall rule for bastion");
        let (_, handle) = self
            .gateway
            .create_firewall_rule(&name, &firewall)
            .await
            .map_err(step_error(ProvisionStep::CreateFirewallRule, &name))?;
        log.record(ResourceKind::FirewallRule, &name, LOCATION_GLOBAL);
        self.await_step(ProvisionStep::CreateFirewallRule, &name, &handle)
            .await
    }

    /// Authenticate the CLI, then create the router and its NAT.
    async fn create_nat_gateway(
        &self,
        spec: &ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<(), ProvisionError> {
        self.gateway
            .authenticate_cli(&spec.project_id)
            .await
            .map_err(step_error(ProvisionStep::AuthenticateCli, &spec.project_id))?;

        let router = names::cloud_router(&spec.name);
        self.gateway
            .create_router(&router, &spec.network, &spec.region)
            .await
            .map_err(step_error(ProvisionStep::CreateRouter, &router))?;
        log.record(ResourceKind::Router, &router, &spec.region);

        let nat = names::cloud_nat(&spec.name);
        self.gateway
            .create_nat(&nat, &router, &spec.region)
            .await
            .map_err(step_error(ProvisionStep::CreateNat, &nat))?;
        log.record(ResourceKind::Nat, &nat, &spec.region);
        Ok(())
    }

    async fn create_cluster(
        &self,
        spec: &ClusterSpec,
        log: &mut ResourceLog,
    ) -> Result<(), ProvisionError> {
        let request = build_create_request(spec);
        info!(
            cluster = %spec.name,
            node_pools = ?spec.node_pool_names(),
            master_cidr = %spec.master_cidr_block,
            "Submitting cluster"
        );

        let handle = self.gateway.create_cluster(&request).await.map_err(|e| {
            if e.is_validation() {
                ProvisionError::Validation {
                    cluster: spec.name.clone(),
                    detail: provider_detail(e),
                }
            } else {
                step_error(ProvisionStep::SubmitCluster, &spec.name)(e)
            }
        })?;
        log.record(ResourceKind::Cluster, &spec.name, &spec.region);

        info!(cluster = %spec.name, operation = %handle, "Waiting for cluster, this takes several minutes");
        self.await_step(ProvisionStep::AwaitCluster, &spec.name, &handle)
            .await
    }

    async fn await_step(
        &self,
        step: ProvisionStep,
        resource: &str,
        handle: &OperationHandle,
    ) -> Result<(), ProvisionError> {
        self.poller
            .await_operation(self.gateway, handle)
            .await
            .map(|_| ())
            .map_err(|source| ProvisionError::Operation {
                step,
                resource: resource.to_string(),
                source,
            })
    }

    /// Delete everything in `log`, newest first.
    ///
    /// The CLI is re-authenticated once, before the first router or NAT.
    /// Deletes are awaited even if the orchestrator's cancellation token has
    /// fired.
    ///
    /// # Errors
    /// Returns [`DestroyError::Incomplete`] listing every entry that could
    /// not be deleted; the remaining entries are still attempted.
    pub async fn rollback(
        &self,
        project: &str,
        cluster: &str,
        region: &str,
        log: &ResourceLog,
    ) -> Result<(), DestroyError> {
        info!(cluster = %cluster, resources = log.len(), "Rolling back");
        // Rollback may follow an interrupted wait; every delete is still awaited.
        let teardown = DestructionOrchestrator::new(
            self.gateway,
            self.poller.detached(),
            self.operator,
            project,
        );
        let router = names::cloud_router(cluster);
        let mut failures = Vec::new();
        let mut authenticated = false;

        for resource in log.entries().iter().rev() {
            let name = resource.name.as_str();
            let result = match resource.kind {
                ResourceKind::Cluster => teardown.delete_cluster(name, region).await,
                ResourceKind::Nat | ResourceKind::Router => {
                    if !authenticated {
                        authenticated = true;
                        destroy::record(&mut failures, teardown.authenticate().await);
                    }
                    if resource.kind == ResourceKind::Nat {
                        teardown.delete_nat(name, &router, &resource.location).await
                    } else {
                        teardown.delete_router(name, &resource.location).await
                    }
                }
                ResourceKind::FirewallRule => teardown.delete_firewall_rule(name).await,
                ResourceKind::Bastion => teardown.delete_instance(&resource.location, name).await,
                ResourceKind::Subnetwork => {
                    teardown.delete_subnetwork(&resource.location, name).await
                }
                ResourceKind::Network => teardown.delete_network(name).await,
            };
            destroy::record(&mut failures, result);
        }

        destroy::finish(failures)
    }
}

fn step_error(step: ProvisionStep, resource: &str) -> impl FnOnce(GatewayError) -> ProvisionError {
    let resource = resource.to_string();
    move |source| ProvisionError::Step {
        step,
        resource,
        source,
    }
}

/// The provider's message without the status prefix.
fn provider_detail(error: GatewayError) -> String {
    match error {
        GatewayError::Api { message, .. } => message,
        other => other.to_string(),
    }
}

fn bastion_startup_script(spec: &ClusterSpec) -> String {
    format!(
        "#! /bin/bash\n\
         apt-get update && apt-get -y install kubectl google-cloud-cli-gke-gcloud-auth-plugin && apt-get -y autoremove\n\
         echo 'gcloud container --project {project} clusters get-credentials {cluster} --region={region} --internal-ip' > /etc/profile.d/gke-ops-{cluster}.sh\n",
        project = spec.project_id,
        cluster = spec.name,
        region = spec.region,
    )
}

// ============================================================================
// Pre-checks
// ============================================================================

/// Fail with [`ProvisionError::Conflict`] if the cluster name is taken.
///
/// # Errors
/// Also returns [`ProvisionError::Step`] if the clusters cannot be listed.
pub async fn ensure_unique_name<G>(gateway: &G, spec: &ClusterSpec) -> Result<(), ProvisionError>
where
    G: ResourceGateway + ?Sized,
{
    let existing = gateway
        .list_cluster_names(&location_path(&spec.project_id, &spec.region))
        .await
        .map_err(step_error(ProvisionStep::SubmitCluster, &spec.name))?;
    if existing.iter().any(|name| *name == spec.name) {
        return Err(ProvisionError::Conflict {
            cluster: spec.name.clone(),
            region: spec.region.clone(),
        });
    }
    Ok(())
}

/// Master ranges already used by private clusters in the project.
///
/// # Errors
/// Returns an error if the firewall rules cannot be listed.
pub async fn used_master_ranges<G>(gateway: &G) -> Result<Vec<Ipv4Net>, GatewayError>
where
    G: ResourceGateway + ?Sized,
{
    let ranges = gateway.list_master_source_ranges().await?;
    Ok(cidr::parse_ranges(&ranges))
}
