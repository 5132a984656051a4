//! Cluster teardown.
//!
//! Every step runs regardless of how the previous ones went. A resource that
//! is already gone counts as deleted. Failures are collected and returned
//! together at the end so the operator knows what to clean up by hand.

use std::fmt::Display;

use tracing::{info, warn};

use crate::error::{DestroyError, GatewayError, StepFailure};
use crate::gateway::{Instance, OperationHandle, ResourceGateway};
use crate::names;
use crate::operator::Operator;
use crate::poller::OperationPoller;
use crate::request::{cluster_path, location_path};

/// What a teardown step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Deleted,
    /// Nothing to delete.
    Absent,
}

/// Teardown steps in the order [`DestructionOrchestrator::destroy`] runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownStep {
    Cluster,
    Bastion,
    FirewallRule,
    Authenticate,
    Nat,
    Router,
    Subnetwork,
    Network,
}

impl TeardownStep {
    const ORDER: [Self; 8] = [
        Self::Cluster,
        Self::Bastion,
        Self::FirewallRule,
        Self::Authenticate,
        Self::Nat,
        Self::Router,
        Self::Subnetwork,
        Self::Network,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Cluster => "delete cluster",
            Self::Bastion => "delete bastion",
            Self::FirewallRule => "delete firewall rule",
            Self::Authenticate => "authenticate gcloud",
            Self::Nat => "delete cloud NAT",
            Self::Router => "delete cloud router",
            Self::Subnetwork => "delete subnetwork",
            Self::Network => "delete network",
        }
    }

    fn resource(self, cluster: &str, project: &str) -> String {
        match self {
            Self::Cluster => cluster.to_string(),
            Self::Bastion => names::bastion(cluster),
            Self::FirewallRule => names::ssh_firewall_rule(cluster),
            Self::Authenticate => project.to_string(),
            Self::Nat => names::cloud_nat(cluster),
            Self::Router => names::cloud_router(cluster),
            Self::Subnetwork => names::private_subnetwork(cluster),
            Self::Network => names::network(cluster),
        }
    }
}

/// Deletes a cluster and the resources created alongside it.
pub struct DestructionOrchestrator<'a, G: ResourceGateway + ?Sized> {
    gateway: &'a G,
    poller: OperationPoller,
    operator: &'a dyn Operator,
    project: String,
}

impl<'a, G: ResourceGateway + ?Sized> DestructionOrchestrator<'a, G> {
    pub fn new(
        gateway: &'a G,
        poller: OperationPoller,
        operator: &'a dyn Operator,
        project: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            poller,
            operator,
            project: project.into(),
        }
    }

    /// Delete `cluster` in `region` and its bastion, firewall rule, NAT,
    /// router, subnetwork and network.
    ///
    /// Once the poller's cancellation token fires no further deletes are
    /// sent; the remaining steps are reported as not attempted.
    ///
    /// # Errors
    /// Returns [`DestroyError::Incomplete`] listing every step that failed.
    pub async fn destroy(&self, cluster: &str, region: &str) -> Result<(), DestroyError> {
        info!(cluster = %cluster, region = %region, project = %self.project, "Destroying cluster");

        let mut failures = Vec::new();
        for step in TeardownStep::ORDER {
            if self.poller.is_cancelled() {
                warn!(step = %step.name(), "Cancelled, not attempting");
                failures.push(StepFailure {
                    step: step.name().to_string(),
                    resource: step.resource(cluster, &self.project),
                    message: "not attempted, teardown was cancelled".to_string(),
                });
                continue;
            }
            record(&mut failures, self.run(step, cluster, region).await);
        }

        finish(failures)
    }

    async fn run(
        &self,
        step: TeardownStep,
        cluster: &str,
        region: &str,
    ) -> Result<Teardown, StepFailure> {
        let resource = step.resource(cluster, &self.project);
        match step {
            TeardownStep::Cluster => self.delete_cluster(cluster, region).await,
            TeardownStep::Bastion => self.delete_bastion(cluster).await,
            TeardownStep::FirewallRule => self.delete_firewall_rule(&resource).await,
            TeardownStep::Authenticate => self.authenticate().await,
            TeardownStep::Nat => {
                self.delete_nat(&resource, &names::cloud_router(cluster), region)
                    .await
            }
            TeardownStep::Router => self.delete_router(&resource, region).await,
            TeardownStep::Subnetwork => self.delete_subnetwork(region, &resource).await,
            TeardownStep::Network => self.delete_network(&resource).await,
        }
    }

    /// Delete the cluster if it is listed in `region`.
    pub(crate) async fn delete_cluster(
        &self,
        cluster: &str,
        region: &str,
    ) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Cluster.name();
        let existing = self
            .gateway
            .list_cluster_names(&location_path(&self.project, region))
            .await
            .map_err(|e| failure(STEP, cluster, &e))?;
        if !existing.iter().any(|name| name == cluster) {
            return Ok(absent(STEP, cluster));
        }

        let handle = self
            .gateway
            .delete_cluster(&cluster_path(&self.project, region, cluster))
            .await;
        self.complete(STEP, cluster, handle).await
    }

    /// Find the cluster's bastion and delete it, asking the operator when
    /// several instances share the name.
    pub(crate) async fn delete_bastion(&self, cluster: &str) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Bastion.name();
        let name = names::bastion(cluster);
        let mut found = self
            .gateway
            .list_instances_by_name_pattern(&name)
            .await
            .map_err(|e| failure(STEP, &name, &e))?;

        let target: Instance = match found.len() {
            0 => return Ok(absent(STEP, &name)),
            1 => found.remove(0),
            count => match self.operator.choose_bastion(&found) {
                Some(index) if index < count => found.swap_remove(index),
                _ => {
                    return Err(failure(
                        STEP,
                        &name,
                        &format!("{count} instances match and none was selected"),
                    ))
                }
            },
        };

        self.delete_instance(&target.zone, &target.name).await
    }

    /// Delete an instance in a known zone.
    pub(crate) async fn delete_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Bastion.name();
        let handle = self.gateway.delete_instance(zone, name).await;
        self.complete(STEP, name, handle).await
    }

    pub(crate) async fn delete_firewall_rule(&self, name: &str) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::FirewallRule.name();
        let exists = self
            .gateway
            .firewall_exists(name)
            .await
            .map_err(|e| failure(STEP, name, &e))?;
        if !exists {
            return Ok(absent(STEP, name));
        }
        let handle = self.gateway.delete_firewall_rule(name).await;
        self.complete(STEP, name, handle).await
    }

    /// Point the CLI at the project before router and NAT calls.
    pub(crate) async fn authenticate(&self) -> Result<Teardown, StepFailure> {
        self.gateway
            .authenticate_cli(&self.project)
            .await
            .map_err(|e| failure(TeardownStep::Authenticate.name(), &self.project, &e))?;
        Ok(Teardown::Deleted)
    }

    pub(crate) async fn delete_nat(
        &self,
        name: &str,
        router: &str,
        region: &str,
    ) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Nat.name();
        let exists = self
            .gateway
            .nat_exists(name, router, region)
            .await
            .map_err(|e| failure(STEP, name, &e))?;
        if !exists {
            return Ok(absent(STEP, name));
        }
        let deleted = self.gateway.delete_nat(name, router, region).await;
        settle(STEP, name, deleted)
    }

    pub(crate) async fn delete_router(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Router.name();
        let exists = self
            .gateway
            .router_exists(name, region)
            .await
            .map_err(|e| failure(STEP, name, &e))?;
        if !exists {
            return Ok(absent(STEP, name));
        }
        let deleted = self.gateway.delete_router(name, region).await;
        settle(STEP, name, deleted)
    }

    pub(crate) async fn delete_subnetwork(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Subnetwork.name();
        let exists = self
            .gateway
            .subnetwork_exists(region, name)
            .await
            .map_err(|e| failure(STEP, name, &e))?;
        if !exists {
            return Ok(absent(STEP, name));
        }
        let handle = self.gateway.delete_subnetwork(region, name).await;
        self.complete(STEP, name, handle).await
    }

    pub(crate) async fn delete_network(&self, name: &str) -> Result<Teardown, StepFailure> {
        const STEP: &str = TeardownStep::Network.name();
        let exists = self
            .gateway
            .network_exists(name)
            .await
            .map_err(|e| failure(STEP, name, &e))?;
        if !exists {
            return Ok(absent(STEP, name));
        }
        let handle = self.gateway.delete_network(name).await;
        self.complete(STEP, name, handle).await
    }

    /// Await a delete operation. A delete the provider rejects with "not
    /// found" means someone got there first.
    async fn complete(
        &self,
        step: &str,
        resource: &str,
        handle: Result<OperationHandle, GatewayError>,
    ) -> Result<Teardown, StepFailure> {
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(absent(step, resource)),
            Err(e) => return Err(failure(step, resource, &e)),
        };
        self.poller
            .await_operation(self.gateway, &handle)
            .await
            .map_err(|e| failure(step, resource, &e))?;
        info!(step = %step, resource = %resource, "Deleted");
        Ok(Teardown::Deleted)
    }
}

fn settle(
    step: &str,
    resource: &str,
    result: Result<(), GatewayError>,
) -> Result<Teardown, StepFailure> {
    match result {
        Ok(()) => {
            info!(step = %step, resource = %resource, "Deleted");
            Ok(Teardown::Deleted)
        }
        Err(e) if e.is_not_found() => Ok(absent(step, resource)),
        Err(e) => Err(failure(step, resource, &e)),
    }
}

fn absent(step: &str, resource: &str) -> Teardown {
    info!(step = %step, resource = %resource, "Not found, skipping");
    Teardown::Absent
}

fn failure(step: &str, resource: &str, error: &dyn Display) -> StepFailure {
    warn!(step = %step, resource = %resource, error = %error, "Teardown step failed");
    StepFailure {
        step: step.to_string(),
        resource: resource.to_string(),
        message: error.to_string(),
    }
}

/// Keep the failure, if any, and carry on.
pub(crate) fn record(failures: &mut Vec<StepFailure>, result: Result<Teardown, StepFailure>) {
    if let Err(failure) = result {
        failures.push(failure);
    }
}

pub(crate) fn finish(failures: Vec<StepFailure>) -> Result<(), DestroyError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DestroyError::Incomplete { failures })
    }
}
