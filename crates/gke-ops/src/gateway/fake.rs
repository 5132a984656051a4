//! Recording in-memory gateway for orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ipnet::Ipv4Net;

use super::{
    FirewallRule, FirewallSpec, Instance, InstanceSpec, Network, NetworkOptions, OperationHandle,
    OperationScope, OperationSnapshot, OperationStatus, ResourceGateway, Subnetwork,
    SubnetworkOptions,
};
use crate::error::GatewayError;
use crate::request::CreateClusterRequest;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    /// `kind/name` keys of resources that currently exist.
    existing: HashSet<String>,
    clusters: Vec<String>,
    instances: Vec<Instance>,
    zones: Vec<String>,
    master_ranges: Vec<String>,
    /// Method name to HTTP status returned instead of succeeding.
    failures: HashMap<String, u16>,
    /// Method name to the statuses its next operation reports.
    scripts: HashMap<String, Vec<OperationSnapshot>>,
    operations: HashMap<String, VecDeque<OperationSnapshot>>,
    next_operation: u32,
    bastion_ip: Option<Ipv4Addr>,
}

/// Fake cloud: creates and deletes mutate an in-memory inventory and every
/// call is appended to a log as `method arg`.
pub(crate) struct FakeGateway {
    state: Mutex<State>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                zones: vec!["us-central1-a".into(), "us-central1-b".into()],
                bastion_ip: Some(Ipv4Addr::new(10, 0, 0, 2)),
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Every call so far.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls whose method name starts with `prefix`.
    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Make `method` fail with `status`.
    pub(crate) fn fail(&self, method: &str, status: u16) {
        self.state().failures.insert(method.to_string(), status);
    }

    /// Statuses reported by the next operation `method` starts.
    pub(crate) fn script_operation(&self, method: &str, statuses: Vec<OperationSnapshot>) {
        self.state().scripts.insert(method.to_string(), statuses);
    }

    /// Seed an existing resource, e.g. `("router", "r1")`.
    pub(crate) fn seed(&self, kind: &str, name: &str) {
        self.state().existing.insert(format!("{kind}/{name}"));
    }

    pub(crate) fn seed_cluster(&self, name: &str) {
        self.state().clusters.push(name.to_string());
    }

    pub(crate) fn seed_instance(&self, zone: &str, name: &str) {
        self.state().instances.push(Instance {
            name: name.to_string(),
            zone: zone.to_string(),
            status: "RUNNING".to_string(),
            private_ip: Some(Ipv4Addr::new(10, 0, 0, 9)),
            public_ip: None,
        });
    }

    pub(crate) fn set_zones(&self, zones: &[&str]) {
        self.state().zones = zones.iter().map(ToString::to_string).collect();
    }

    pub(crate) fn set_bastion_ip(&self, ip: Option<Ipv4Addr>) {
        self.state().bastion_ip = ip;
    }

    pub(crate) fn set_master_ranges(&self, ranges: &[&str]) {
        self.state().master_ranges = ranges.iter().map(ToString::to_string).collect();
    }

    pub(crate) fn exists(&self, kind: &str, name: &str) -> bool {
        self.state().existing.contains(&format!("{kind}/{name}"))
    }

    pub(crate) fn cluster_names(&self) -> Vec<String> {
        self.state().clusters.clone()
    }

    /// Record the call and return the injected failure for `method`, if any.
    fn enter(&self, method: &str, arg: &str) -> Result<MutexGuard<'_, State>, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("{method} {arg}"));
        match state.failures.get(method) {
            Some(404) => Err(GatewayError::NotFound(format!("{arg} not found"))),
            Some(&status) => Err(GatewayError::Api {
                status,
                message: format!("injected {method} failure"),
            }),
            None => Ok(state),
        }
    }

    fn start_operation(state: &mut State, method: &str, scope: OperationScope) -> OperationHandle {
        state.next_operation += 1;
        let name = format!("op-{}", state.next_operation);
        let script = state
            .scripts
            .remove(method)
            .unwrap_or_else(|| vec![OperationSnapshot::new(OperationStatus::Done)]);
        state.operations.insert(name.clone(), script.into());
        OperationHandle { name, scope }
    }

    fn global() -> OperationScope {
        OperationScope::ComputeGlobal {
            project: "fake".into(),
        }
    }

    fn region(region: &str) -> OperationScope {
        OperationScope::ComputeRegion {
            project: "fake".into(),
            region: region.into(),
        }
    }

    fn remove(state: &mut State, kind: &str, name: &str) -> Result<(), GatewayError> {
        if state.existing.remove(&format!("{kind}/{name}")) {
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!("{kind} {name}")))
        }
    }
}

#[async_trait]
impl ResourceGateway for FakeGateway {
    async fn create_network(
        &self,
        name: &str,
        _opts: &NetworkOptions,
    ) -> Result<(Network, OperationHandle), GatewayError> {
        let mut state = self.enter("create_network", name)?;
        state.existing.insert(format!("network/{name}"));
        let op = Self::start_operation(&mut state, "create_network", Self::global());
        Ok((
            Network {
                name: name.to_string(),
                self_link: None,
            },
            op,
        ))
    }

    async fn delete_network(&self, name: &str) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("delete_network", name)?;
        Self::remove(&mut state, "network", name)?;
        Ok(Self::start_operation(&mut state, "delete_network", Self::global()))
    }

    async fn network_exists(&self, name: &str) -> Result<bool, GatewayError> {
        let state = self.enter("network_exists", name)?;
        Ok(state.existing.contains(&format!("network/{name}")))
    }

    async fn create_subnetwork(
        &self,
        _network: &str,
        name: &str,
        region: &str,
        cidr: Ipv4Net,
        _opts: &SubnetworkOptions,
    ) -> Result<(Subnetwork, OperationHandle), GatewayError> {
        let mut state = self.enter("create_subnetwork", name)?;
        state.existing.insert(format!("subnetwork/{name}"));
        let op = Self::start_operation(&mut state, "create_subnetwork", Self::region(region));
        Ok((
            Subnetwork {
                name: name.to_string(),
                region: region.to_string(),
                ip_cidr_range: Some(cidr.to_string()),
            },
            op,
        ))
    }

    async fn delete_subnetwork(
        &self,
        region: &str,
        name: &str,
    ) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("delete_subnetwork", name)?;
        Self::remove(&mut state, "subnetwork", name)?;
        Ok(Self::start_operation(&mut state, "delete_subnetwork", Self::region(region)))
    }

    async fn subnetwork_exists(&self, _region: &str, name: &str) -> Result<bool, GatewayError> {
        let state = self.enter("subnetwork_exists", name)?;
        Ok(state.existing.contains(&format!("subnetwork/{name}")))
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<String>, GatewayError> {
        let state = self.enter("list_zones", region)?;
        Ok(state.zones.clone())
    }

    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        _spec: &InstanceSpec,
    ) -> Result<(Instance, OperationHandle), GatewayError> {
        let mut state = self.enter("create_instance", name)?;
        let instance = Instance {
            name: name.to_string(),
            zone: zone.to_string(),
            status: "RUNNING".to_string(),
            private_ip: state.bastion_ip,
            public_ip: Some("34.0.0.1".to_string()),
        };
        state.instances.push(instance.clone());
        let scope = OperationScope::ComputeZone {
            project: "fake".into(),
            zone: zone.into(),
        };
        let op = Self::start_operation(&mut state, "create_instance", scope);
        Ok((instance, op))
    }

    async fn get_instance(&self, zone: &str, name: &str) -> Result<Instance, GatewayError> {
        let state = self.enter("get_instance", name)?;
        state
            .instances
            .iter()
            .find(|i| i.name == name && i.zone == zone)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("instance {name}")))
    }

    async fn delete_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("delete_instance", &format!("{zone}/{name}"))?;
        let before = state.instances.len();
        state.instances.retain(|i| !(i.name == name && i.zone == zone));
        if state.instances.len() == before {
            return Err(GatewayError::NotFound(format!("instance {name}")));
        }
        let scope = OperationScope::ComputeZone {
            project: "fake".into(),
            zone: zone.into(),
        };
        Ok(Self::start_operation(&mut state, "delete_instance", scope))
    }

    async fn list_instances_by_name_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<Instance>, GatewayError> {
        let state = self.enter("list_instances_by_name_pattern", pattern)?;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.name == pattern)
            .cloned()
            .collect())
    }

    async fn create_firewall_rule(
        &self,
        name: &str,
        spec: &FirewallSpec,
    ) -> Result<(FirewallRule, OperationHandle), GatewayError> {
        let mut state = self.enter("create_firewall_rule", name)?;
        state.existing.insert(format!("firewall/{name}"));
        let op = Self::start_operation(&mut state, "create_firewall_rule", Self::global());
        Ok((
            FirewallRule {
                name: name.to_string(),
                network: Some(spec.network.clone()),
            },
            op,
        ))
    }

    async fn delete_firewall_rule(&self, name: &str) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("delete_firewall_rule", name)?;
        Self::remove(&mut state, "firewall", name)?;
        Ok(Self::start_operation(&mut state, "delete_firewall_rule", Self::global()))
    }

    async fn firewall_exists(&self, name: &str) -> Result<bool, GatewayError> {
        let state = self.enter("firewall_exists", name)?;
        Ok(state.existing.contains(&format!("firewall/{name}")))
    }

    async fn list_master_source_ranges(&self) -> Result<Vec<String>, GatewayError> {
        let state = self.enter("list_master_source_ranges", "")?;
        Ok(state.master_ranges.clone())
    }

    async fn authenticate_cli(&self, project: &str) -> Result<(), GatewayError> {
        self.enter("authenticate_cli", project).map(|_| ())
    }

    async fn create_router(
        &self,
        name: &str,
        _network: &str,
        _region: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.enter("create_router", name)?;
        state.existing.insert(format!("router/{name}"));
        Ok(())
    }

    async fn delete_router(&self, name: &str, _region: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_router", name)?;
        Self::remove(&mut state, "router", name)
    }

    async fn router_exists(&self, name: &str, _region: &str) -> Result<bool, GatewayError> {
        let state = self.enter("router_exists", name)?;
        Ok(state.existing.contains(&format!("router/{name}")))
    }

    async fn create_nat(&self, name: &str, _router: &str, _region: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("create_nat", name)?;
        state.existing.insert(format!("nat/{name}"));
        Ok(())
    }

    async fn delete_nat(&self, name: &str, _router: &str, _region: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_nat", name)?;
        Self::remove(&mut state, "nat", name)
    }

    async fn nat_exists(
        &self,
        name: &str,
        _router: &str,
        _region: &str,
    ) -> Result<bool, GatewayError> {
        let state = self.enter("nat_exists", name)?;
        Ok(state.existing.contains(&format!("nat/{name}")))
    }

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("create_cluster", &request.cluster.name)?;
        state.clusters.push(request.cluster.name.clone());
        Ok(Self::start_operation(
            &mut state,
            "create_cluster",
            OperationScope::Container {
                project: "fake".into(),
                location: "fake".into(),
            },
        ))
    }

    async fn delete_cluster(&self, path: &str) -> Result<OperationHandle, GatewayError> {
        let mut state = self.enter("delete_cluster", path)?;
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let before = state.clusters.len();
        state.clusters.retain(|c| *c != name);
        if state.clusters.len() == before {
            return Err(GatewayError::NotFound(format!("cluster {name}")));
        }
        Ok(Self::start_operation(
            &mut state,
            "delete_cluster",
            OperationScope::Container {
                project: "fake".into(),
                location: "fake".into(),
            },
        ))
    }

    async fn list_cluster_names(&self, parent: &str) -> Result<Vec<String>, GatewayError> {
        let state = self.enter("list_cluster_names", parent)?;
        Ok(state.clusters.clone())
    }

    async fn get_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationSnapshot, GatewayError> {
        let mut state = self.enter("get_operation", &handle.name)?;
        let queue = state
            .operations
            .get_mut(&handle.name)
            .ok_or_else(|| GatewayError::NotFound(format!("operation {}", handle.name)))?;
        // The last scripted status repeats once the script runs out.
        let snapshot = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        snapshot.ok_or_else(|| GatewayError::NotFound(format!("operation {}", handle.name)))
    }
}
