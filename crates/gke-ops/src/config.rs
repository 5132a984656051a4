//! Runtime settings and cluster spec files.
//!
//! A spec file describes one cluster in TOML:
//!
//! ```toml
//! name = "demo"
//! region = "us-central1"
//! private_nodes = true
//! stackdriver = false
//!
//! [network]
//! mode = "custom"
//!
//! [[worker]]
//! machine_type = "e2-standard-4"
//! desired_nodes = 2
//!
//! [[worker]]
//! machine_type = "e2-small"
//! desired_nodes = 1
//! autoscaling = true
//! min_nodes = 1
//! max_nodes = 3
//! scope_set = "full"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{scopes, ClusterSpec, NetworkMode, WorkerGroupSpec};
use crate::error::{GatewayError, ProvisionError};
use crate::gateway::{GcloudCli, Gcp};
use crate::poller::{OperationPoller, PollConfig};

/// Default service account key location.
pub const DEFAULT_CREDENTIALS_FILE: &str = "/ops/gcp.json";

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing setting: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Invalid(#[from] ProvisionError),
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project every resource is created in.
    pub project_id: String,
    /// `OAuth2` token for the REST APIs.
    pub access_token: String,
    /// Service account key used to authenticate `gcloud`.
    pub credentials_file: PathBuf,
    /// Service account the bastion runs as.
    pub service_account_email: Option<String>,
    /// Region used when the cluster file or prompt does not give one.
    pub region: Option<String>,
    pub poll: PollConfig,
}

impl Settings {
    /// Reject settings that cannot reach the provider.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] for the first empty required value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("project"));
        }
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::Missing("access token"));
        }
        Ok(())
    }

    /// Poll settings from the CLI's millisecond interval and optional
    /// timeout in seconds.
    #[must_use]
    pub fn poll_config(interval_ms: u64, timeout_secs: Option<u64>) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(interval_ms),
            max_attempts: None,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn poller(&self) -> OperationPoller {
        OperationPoller::new(self.poll.clone())
    }

    /// Build the production gateway.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn gateway(&self) -> Result<Gcp, GatewayError> {
        let cli = GcloudCli::new(&self.credentials_file);
        Gcp::new(&self.project_id, &self.access_token, cli)
    }
}

/// Which OAuth scopes a worker group's nodes get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeSet {
    /// GKE's default node scopes.
    #[default]
    Default,
    /// Every Cloud API.
    Full,
}

impl std::fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// One `[[worker]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerGroupFile {
    pub machine_type: String,
    #[serde(default = "one")]
    pub desired_nodes: u32,
    #[serde(default)]
    pub autoscaling: bool,
    pub min_nodes: Option<u32>,
    pub max_nodes: Option<u32>,
    #[serde(default)]
    pub scope_set: ScopeSet,
    /// Extra scopes on top of the default set, by URL.
    #[serde(default)]
    pub extra_scopes: Vec<String>,
}

fn one() -> u32 {
    1
}

impl WorkerGroupFile {
    fn into_worker(self) -> WorkerGroupSpec {
        let oauth_scopes = match self.scope_set {
            ScopeSet::Full => scopes::full_scopes(),
            ScopeSet::Default => {
                let extra: Vec<&str> = self.extra_scopes.iter().map(String::as_str).collect();
                scopes::custom_scopes(&extra)
            }
        };
        let desired_nodes = if self.autoscaling {
            self.min_nodes.unwrap_or(self.desired_nodes)
        } else {
            self.desired_nodes
        };
        WorkerGroupSpec {
            machine_type: self.machine_type,
            desired_nodes,
            min_nodes: self.min_nodes,
            max_nodes: self.max_nodes,
            autoscaling: self.autoscaling,
            oauth_scopes,
        }
    }
}

/// A cluster described in a spec file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpecFile {
    pub name: String,
    pub region: Option<String>,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub private_nodes: bool,
    /// Fixed master range; allocated when absent.
    pub master_cidr_block: Option<Ipv4Net>,
    #[serde(default)]
    pub stackdriver: bool,
    #[serde(rename = "worker", default)]
    pub workers: Vec<WorkerGroupFile>,
}

impl ClusterSpecFile {
    /// Build and validate the [`ClusterSpec`].
    ///
    /// `master_block` is used for private clusters when the file does not
    /// pin one.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] without a region, or
    /// [`ConfigError::Invalid`] if the cluster spec fails validation.
    pub fn into_spec(
        self,
        project_id: &str,
        default_region: Option<&str>,
        master_block: Ipv4Net,
    ) -> Result<ClusterSpec, ConfigError> {
        let region = self
            .region
            .as_deref()
            .or(default_region)
            .ok_or(ConfigError::Missing("region"))?;

        let mut spec = ClusterSpec::new(project_id, &self.name, region, &self.network)
            .with_stackdriver(self.stackdriver);
        if self.private_nodes {
            spec = spec.with_private_nodes(self.master_cidr_block.unwrap_or(master_block));
        }
        for worker in self.workers {
            spec = spec.with_worker(worker.into_worker());
        }
        spec.validate()?;
        Ok(spec)
    }
}

/// Read a spec file.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid spec.
pub fn load_cluster_spec(path: &Path) -> Result<ClusterSpecFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::cidr::DEFAULT_MASTER_BLOCK;

    const SAMPLE: &str = r#"
name = "demo"
region = "us-central1"
private_nodes = true

[network]
mode = "custom"

[[worker]]
machine_type = "e2-standard-4"
desired_nodes = 2

[[worker]]
machine_type = "e2-small"
autoscaling = true
min_nodes = 1
max_nodes = 3
scope_set = "full"
"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample() {
        let file = write(SAMPLE);
        let spec_file = load_cluster_spec(file.path()).unwrap();
        assert_eq!(spec_file.network, NetworkMode::Custom);
        assert_eq!(spec_file.workers.len(), 2);

        let block: Ipv4Net = "172.16.0.48/28".parse().unwrap();
        let spec = spec_file.into_spec("p", None, block).unwrap();
        assert!(spec.custom_network);
        assert!(spec.enable_private_nodes);
        assert_eq!(spec.master_cidr_block, block);
        assert_eq!(spec.network, "gke-ops-demo-network");
        assert_eq!(spec.workers[1].desired_nodes, 1);
        assert_eq!(spec.workers[1].oauth_scopes, scopes::full_scopes());
        assert_eq!(spec.workers[0].oauth_scopes, scopes::default_scopes());
    }

    #[test]
    fn test_existing_network_mode() {
        let file = write(
            r#"
name = "demo"

[network]
mode = "existing"
network = "shared"
subnetwork = "shared-sub"

[[worker]]
machine_type = "e2-small"
"#,
        );
        let spec = load_cluster_spec(file.path())
            .unwrap()
            .into_spec("p", Some("europe-west1"), DEFAULT_MASTER_BLOCK)
            .unwrap();
        assert_eq!(spec.region, "europe-west1");
        assert_eq!(spec.network, "shared");
        assert_eq!(spec.subnetwork, "shared-sub");
        assert!(!spec.custom_network);
        assert_eq!(spec.workers[0].desired_nodes, 1);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let file = write(
            r#"
name = "demo"
region = "us-central1"

[[worker]]
machine_type = "e2-small"
autoscaling = true
min_nodes = 4
max_nodes = 2
"#,
        );
        let err = load_cluster_spec(file.path())
            .unwrap()
            .into_spec("p", None, DEFAULT_MASTER_BLOCK)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ProvisionError::InvalidSpec(_))));
    }

    #[test]
    fn test_rejects_missing_workers_and_region() {
        let file = write("name = \"demo\"\nregion = \"us-central1\"\n");
        let err = load_cluster_spec(file.path())
            .unwrap()
            .into_spec("p", None, DEFAULT_MASTER_BLOCK)
            .unwrap_err();
        assert!(err.to_string().contains("worker group"));

        let file = write("name = \"demo\"\n[[worker]]\nmachine_type = \"e2-small\"\n");
        let err = load_cluster_spec(file.path())
            .unwrap()
            .into_spec("p", None, DEFAULT_MASTER_BLOCK)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("region")));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let file = write("name = \"demo\"\nnodes = 3\n");
        assert!(matches!(
            load_cluster_spec(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings {
            project_id: "p".into(),
            access_token: String::new(),
            credentials_file: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            service_account_email: None,
            region: None,
            poll: Settings::poll_config(5000, Some(600)),
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Missing("access token"))));
        assert_eq!(settings.poll.timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.poller().config().interval, Duration::from_millis(5000));
    }
}
