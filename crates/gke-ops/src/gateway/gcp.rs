//! Google Cloud implementation of [`ResourceGateway`].

use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    AccessConfigDefinition, AttachedDiskDefinition, ClusterListResponse, ComputeOperation,
    ContainerOperation, FirewallAllowed, FirewallInsert, FirewallList, GceInstance,
    InitializeParams, InstanceAggregatedList, InstanceInsert, Metadata, MetadataItem,
    NamedResource, NetworkInsert, NetworkInterfaceDefinition, Paged, RoutingConfig,
    ServiceAccount, SubnetworkInsert, SubnetworkLogConfig, Tags, ZoneList,
};
use super::{
    FirewallRule, FirewallSpec, GcloudCli, Instance, InstanceSpec, Network, NetworkOptions,
    OperationHandle, OperationScope, OperationSnapshot, OperationStatus, ResourceGateway,
    Subnetwork, SubnetworkOptions,
};
use crate::error::GatewayError;
use crate::request::CreateClusterRequest;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";
const CONTAINER_API: &str = "https://container.googleapis.com/v1";

/// Scope granted to the bastion's service account.
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Filter matching the ingress rules GKE creates for private masters.
const MASTER_FIREWALL_FILTER: &str = "name eq gke-.*-.*-master";

/// GCP gateway.
#[derive(Clone)]
pub struct Gcp {
    /// HTTP client.
    client: Client,
    /// Project ID.
    project_id: String,
    /// Access token (from service account or user).
    access_token: String,
    /// Compute Engine API root.
    compute_api: String,
    /// Kubernetes Engine API root.
    container_api: String,
    /// CLI used for routers and NAT.
    cli: GcloudCli,
}

impl Gcp {
    /// Create a new GCP gateway.
    ///
    /// # Arguments
    /// * `project_id` - GCP project ID
    /// * `access_token` - `OAuth2` access token
    /// * `cli` - `gcloud` wrapper for router and NAT operations
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        project_id: impl Into<String>,
        access_token: impl Into<String>,
        cli: GcloudCli,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            client,
            project_id: project_id.into(),
            access_token: access_token.into(),
            compute_api: COMPUTE_API.to_string(),
            container_api: CONTAINER_API.to_string(),
            cli,
        })
    }

    /// Point the gateway at different API roots.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        compute_api: impl Into<String>,
        container_api: impl Into<String>,
    ) -> Self {
        self.compute_api = compute_api.into().trim_end_matches('/').to_string();
        self.container_api = container_api.into().trim_end_matches('/').to_string();
        self
    }

    /// Project this gateway operates on.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `{compute_api}/projects/{project}/{path}`.
    fn compute_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{path}", self.compute_api, self.project_id)
    }

    /// Relative resource path, as accepted in request bodies.
    fn compute_ref(&self, path: &str) -> String {
        format!("projects/{}/{path}", self.project_id)
    }

    fn compute_handle(op: ComputeOperation, scope: OperationScope) -> OperationHandle {
        debug!(operation = %op.name, status = %op.status, "Compute operation started");
        OperationHandle {
            name: op.name,
            scope,
        }
    }

    fn global_scope(&self) -> OperationScope {
        OperationScope::ComputeGlobal {
            project: self.project_id.clone(),
        }
    }

    /// Make an authenticated GET request.
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, url: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated DELETE request.
    async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// GET a resource, mapping 404 to `false`.
    async fn exists(&self, url: &str) -> Result<bool, GatewayError> {
        match self.get::<NamedResource>(url).await {
            Ok(resource) => {
                debug!(name = %resource.name, "Resource exists");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Follow `nextPageToken` until every page of a list has been read.
    async fn list_all<P>(&self, url: &str, filter: Option<&str>) -> Result<Vec<P::Item>, GatewayError>
    where
        P: Paged + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut page_url =
                Url::parse(url).map_err(|e| GatewayError::Config(format!("bad URL {url}: {e}")))?;
            {
                let mut query = page_url.query_pairs_mut();
                if let Some(filter) = filter {
                    query.append_pair("filter", filter);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let page: P = self.get(page_url.as_str()).await?;
            let (mut page_items, next) = page.into_parts();
            items.append(&mut page_items);
            match next {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }

    /// Handle API response.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                GatewayError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(GatewayError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(GatewayError::Auth(text))
        } else {
            Err(GatewayError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Convert GCE instance to our type.
    fn to_instance(instance: &GceInstance) -> Instance {
        let nic = instance.network_interfaces.first();
        let private_ip = nic
            .and_then(|ni| ni.network_ip.as_deref())
            .and_then(|ip| ip.parse().ok());
        let public_ip = nic
            .and_then(|ni| ni.access_configs.first())
            .and_then(|ac| ac.nat_ip.clone());

        // Extract zone from URL
        let zone = instance
            .zone
            .rsplit('/')
            .next()
            .unwrap_or(&instance.zone)
            .to_string();

        Instance {
            name: instance.name.clone(),
            zone,
            status: instance.status.clone(),
            private_ip,
            public_ip,
        }
    }

    /// `location` segment of a `projects/*/locations/*[/...]` path.
    fn location_of(path: &str) -> Result<&str, GatewayError> {
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("projects"), Some(_), Some("locations"), Some(location)) => Ok(location),
            _ => Err(GatewayError::Config(format!(
                "expected projects/*/locations/* path, got {path}"
            ))),
        }
    }
}

#[async_trait]
impl ResourceGateway for Gcp {
    // ========================================================================
    // Networks
    // ========================================================================

    async fn create_network(
        &self,
        name: &str,
        opts: &NetworkOptions,
    ) -> Result<(Network, OperationHandle), GatewayError> {
        info!(network = %name, "Creating network");

        let body = NetworkInsert {
            name: name.to_string(),
            auto_create_subnetworks: opts.auto_create_subnetworks,
            routing_config: RoutingConfig {
                routing_mode: opts.routing_mode.clone(),
            },
        };
        let op: ComputeOperation = self.post(&self.compute_url("global/networks"), &body).await?;

        let network = Network {
            name: name.to_string(),
            self_link: Some(self.compute_ref(&format!("global/networks/{name}"))),
        };
        Ok((network, Self::compute_handle(op, self.global_scope())))
    }

    async fn delete_network(&self, name: &str) -> Result<OperationHandle, GatewayError> {
        info!(network = %name, "Deleting network");
        let op: ComputeOperation = self
            .delete(&self.compute_url(&format!("global/networks/{name}")))
            .await?;
        Ok(Self::compute_handle(op, self.global_scope()))
    }

    async fn network_exists(&self, name: &str) -> Result<bool, GatewayError> {
        self.exists(&self.compute_url(&format!("global/networks/{name}")))
            .await
    }

    async fn create_subnetwork(
        &self,
        network: &str,
        name: &str,
        region: &str,
        cidr: Ipv4Net,
        opts: &SubnetworkOptions,
    ) -> Result<(Subnetwork, OperationHandle), GatewayError> {
        info!(subnetwork = %name, network = %network, region = %region, range = %cidr, "Creating subnetwork");

        let body = SubnetworkInsert {
            name: name.to_string(),
            network: self.compute_ref(&format!("global/networks/{network}")),
            ip_cidr_range: cidr.to_string(),
            private_ip_google_access: opts.private_ip_google_access,
            log_config: SubnetworkLogConfig {
                enable: opts.enable_flow_logs,
            },
        };
        let op: ComputeOperation = self
            .post(
                &self.compute_url(&format!("regions/{region}/subnetworks")),
                &body,
            )
            .await?;

        let subnetwork = Subnetwork {
            name: name.to_string(),
            region: region.to_string(),
            ip_cidr_range: Some(cidr.to_string()),
        };
        let scope = OperationScope::ComputeRegion {
            project: self.project_id.clone(),
            region: region.to_string(),
        };
        Ok((subnetwork, Self::compute_handle(op, scope)))
    }

    async fn delete_subnetwork(
        &self,
        region: &str,
        name: &str,
    ) -> Result<OperationHandle, GatewayError> {
        info!(subnetwork = %name, region = %region, "Deleting subnetwork");
        let op: ComputeOperation = self
            .delete(&self.compute_url(&format!("regions/{region}/subnetworks/{name}")))
            .await?;
        let scope = OperationScope::ComputeRegion {
            project: self.project_id.clone(),
            region: region.to_string(),
        };
        Ok(Self::compute_handle(op, scope))
    }

    async fn subnetwork_exists(&self, region: &str, name: &str) -> Result<bool, GatewayError> {
        self.exists(&self.compute_url(&format!("regions/{region}/subnetworks/{name}")))
            .await
    }

    // ========================================================================
    // Instances
    // ========================================================================

    async fn list_zones(&self, region: &str) -> Result<Vec<String>, GatewayError> {
        let filter = format!("name eq {region}-.*");
        let zones = self
            .list_all::<ZoneList>(&self.compute_url("zones"), Some(&filter))
            .await?;
        let mut names: Vec<String> = zones.into_iter().map(|z| z.name).collect();
        names.sort();
        Ok(names)
    }

    async fn create_instance(
        &self,
        zone: &str,
        name: &str,
        spec: &InstanceSpec,
    ) -> Result<(Instance, OperationHandle), GatewayError> {
        info!(
            instance = %name,
            zone = %zone,
            machine_type = %spec.machine_type,
            "Creating Compute Engine instance"
        );

        let metadata = spec.startup_script.as_ref().map(|script| Metadata {
            items: vec![MetadataItem {
                key: "startup-script".to_string(),
                value: script.clone(),
            }],
        });

        let service_accounts = spec
            .service_account_email
            .iter()
            .map(|email| ServiceAccount {
                email: email.clone(),
                scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            })
            .collect();

        let body = InstanceInsert {
            name: name.to_string(),
            machine_type: format!("zones/{zone}/machineTypes/{}", spec.machine_type),
            description: spec.description.clone(),
            tags: Tags {
                items: spec.tags.clone(),
            },
            disks: vec![AttachedDiskDefinition {
                boot: true,
                auto_delete: true,
                initialize_params: InitializeParams {
                    source_image: spec.source_image.clone(),
                    disk_size_gb: spec.disk_size_gb.to_string(),
                    disk_type: format!("zones/{zone}/diskTypes/pd-standard"),
                },
            }],
            network_interfaces: vec![NetworkInterfaceDefinition {
                subnetwork: spec.subnetwork.clone(),
                access_configs: vec![AccessConfigDefinition {
                    access_type: "ONE_TO_ONE_NAT".to_string(),
                    name: "External NAT".to_string(),
                    network_tier: "PREMIUM".to_string(),
                }],
            }],
            metadata,
            service_accounts,
        };

        let op: ComputeOperation = self
            .post(&self.compute_url(&format!("zones/{zone}/instances")), &body)
            .await?;

        let instance = Instance {
            name: name.to_string(),
            zone: zone.to_string(),
            status: "PROVISIONING".to_string(),
            private_ip: None,
            public_ip: None,
        };
        let scope = OperationScope::ComputeZone {
            project: self.project_id.clone(),
            zone: zone.to_string(),
        };
        Ok((instance, Self::compute_handle(op, scope)))
    }

    async fn get_instance(&self, zone: &str, name: &str) -> Result<Instance, GatewayError> {
        let instance: GceInstance = self
            .get(&self.compute_url(&format!("zones/{zone}/instances/{name}")))
            .await?;
        Ok(Self::to_instance(&instance))
    }

    async fn delete_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<OperationHandle, GatewayError> {
        info!(instance = %name, zone = %zone, "Deleting instance");
        let op: ComputeOperation = self
            .delete(&self.compute_url(&format!("zones/{zone}/instances/{name}")))
            .await?;
        let scope = OperationScope::ComputeZone {
            project: self.project_id.clone(),
            zone: zone.to_string(),
        };
        Ok(Self::compute_handle(op, scope))
    }

    async fn list_instances_by_name_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<Instance>, GatewayError> {
        let filter = format!("name eq {pattern}");
        let instances = self
            .list_all::<InstanceAggregatedList>(
                &self.compute_url("aggregated/instances"),
                Some(&filter),
            )
            .await?;
        let mut instances: Vec<Instance> = instances.iter().map(Self::to_instance).collect();
        instances.sort_by(|a, b| (&a.zone, &a.name).cmp(&(&b.zone, &b.name)));
        Ok(instances)
    }

    // ========================================================================
    // Firewall rules
    // ========================================================================

    async fn create_firewall_rule(
        &self,
        name: &str,
        spec: &FirewallSpec,
    ) -> Result<(FirewallRule, OperationHandle), GatewayError> {
        info!(firewall = %name, tags = ?spec.target_tags, "Creating firewall rule");

        let body = FirewallInsert {
            name: name.to_string(),
            network: spec.network.clone(),
            direction: "INGRESS".to_string(),
            allowed: vec![FirewallAllowed {
                ip_protocol: "tcp".to_string(),
                ports: spec.tcp_ports.iter().map(ToString::to_string).collect(),
            }],
            source_ranges: spec.source_ranges.iter().map(ToString::to_string).collect(),
            target_tags: spec.target_tags.clone(),
        };
        let op: ComputeOperation = self
            .post(&self.compute_url("global/firewalls"), &body)
            .await?;

        let rule = FirewallRule {
            name: name.to_string(),
            network: Some(spec.network.clone()),
        };
        Ok((rule, Self::compute_handle(op, self.global_scope())))
    }

    async fn delete_firewall_rule(&self, name: &str) -> Result<OperationHandle, GatewayError> {
        info!(firewall = %name, "Deleting firewall rule");
        let op: ComputeOperation = self
            .delete(&self.compute_url(&format!("global/firewalls/{name}")))
            .await?;
        Ok(Self::compute_handle(op, self.global_scope()))
    }

    async fn firewall_exists(&self, name: &str) -> Result<bool, GatewayError> {
        self.exists(&self.compute_url(&format!("global/firewalls/{name}")))
            .await
    }

    async fn list_master_source_ranges(&self) -> Result<Vec<String>, GatewayError> {
        let rules = self
            .list_all::<FirewallList>(
                &self.compute_url("global/firewalls"),
                Some(MASTER_FIREWALL_FILTER),
            )
            .await?;
        let mut ranges: Vec<String> = rules
            .into_iter()
            .filter(|rule| !rule.disabled && rule.direction == "INGRESS")
            .inspect(|rule| debug!(firewall = %rule.name, network = ?rule.network, "Master firewall rule"))
            .flat_map(|rule| rule.source_ranges)
            .collect();
        ranges.sort();
        Ok(ranges)
    }

    // ========================================================================
    // Routers and NAT
    // ========================================================================

    async fn authenticate_cli(&self, project: &str) -> Result<(), GatewayError> {
        self.cli.authenticate(project).await
    }

    async fn create_router(
        &self,
        name: &str,
        network: &str,
        region: &str,
    ) -> Result<(), GatewayError> {
        info!(router = %name, network = %network, region = %region, "Creating cloud router");
        self.cli.create_router(name, network, region).await
    }

    async fn delete_router(&self, name: &str, region: &str) -> Result<(), GatewayError> {
        info!(router = %name, region = %region, "Deleting cloud router");
        self.cli.delete_router(name, region).await
    }

    async fn router_exists(&self, name: &str, region: &str) -> Result<bool, GatewayError> {
        self.cli.router_exists(name, region).await
    }

    async fn create_nat(&self, name: &str, router: &str, region: &str) -> Result<(), GatewayError> {
        info!(nat = %name, router = %router, region = %region, "Creating cloud NAT");
        self.cli.create_nat(name, router, region).await
    }

    async fn delete_nat(&self, name: &str, router: &str, region: &str) -> Result<(), GatewayError> {
        info!(nat = %name, router = %router, region = %region, "Deleting cloud NAT");
        self.cli.delete_nat(name, router, region).await
    }

    async fn nat_exists(
        &self,
        name: &str,
        router: &str,
        region: &str,
    ) -> Result<bool, GatewayError> {
        self.cli.nat_exists(name, router, region).await
    }

    // ========================================================================
    // GKE
    // ========================================================================

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<OperationHandle, GatewayError> {
        info!(
            cluster = %request.cluster.name,
            parent = %request.parent,
            node_pools = request.cluster.node_pools.len(),
            "Creating GKE cluster"
        );

        let location = Self::location_of(&request.parent)?;
        let url = format!("{}/{}/clusters", self.container_api, request.parent);
        let op: ContainerOperation = self.post(&url, request).await?;

        info!(operation = %op.name, "GKE cluster creation initiated");
        Ok(OperationHandle::container(op.name, &self.project_id, location))
    }

    async fn delete_cluster(&self, path: &str) -> Result<OperationHandle, GatewayError> {
        info!(cluster = %path, "Deleting GKE cluster");

        let location = Self::location_of(path)?;
        let op: ContainerOperation = self
            .delete(&format!("{}/{path}", self.container_api))
            .await?;

        info!(operation = %op.name, "GKE cluster deletion initiated");
        Ok(OperationHandle::container(op.name, &self.project_id, location))
    }

    async fn list_cluster_names(&self, parent: &str) -> Result<Vec<String>, GatewayError> {
        let response: ClusterListResponse = self
            .get(&format!("{}/{parent}/clusters", self.container_api))
            .await?;
        let mut names: Vec<String> = response.clusters.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }

    async fn get_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationSnapshot, GatewayError> {
        match handle.scope {
            OperationScope::Container { .. } => {
                let url = format!("{}/{}", self.container_api, handle.path());
                let op: ContainerOperation = self.get(&url).await?;
                let error = op
                    .error
                    .and_then(|e| match (e.code, e.message) {
                        (_, Some(message)) if !message.is_empty() => Some(message),
                        (Some(code), _) if code != 0 => Some(format!("error code {code}")),
                        _ => None,
                    })
                    .or_else(|| (op.status == "ABORTING").then(|| op.status_message.clone()).flatten());
                Ok(OperationSnapshot {
                    status: OperationStatus::from_provider(&op.status),
                    error,
                })
            }
            _ => {
                let url = format!("{}/{}", self.compute_api, handle.path());
                let op: ComputeOperation = self.get(&url).await?;
                Ok(OperationSnapshot {
                    status: OperationStatus::from_provider(&op.status),
                    error: op.error.map(|e| e.summary()),
                })
            }
        }
    }
}
