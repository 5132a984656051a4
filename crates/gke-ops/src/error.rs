//! Error types for gateway calls, operation polling and orchestration.

use std::fmt;

use thiserror::Error;

/// Errors returned by a [`ResourceGateway`](crate::gateway::ResourceGateway) call.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External CLI invocation failed.
    #[error("`{command}` failed: {stderr}")]
    Cli { command: String, stderr: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the provider reported the resource as absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Api { status: 404, .. })
    }

    /// Whether the provider rejected the request before starting any work.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Api { status: 400, .. })
    }
}

/// Errors from waiting on a long-running operation.
#[derive(Error, Debug)]
pub enum PollError {
    /// The operation reached a failure-terminal status.
    #[error("Operation {operation} failed: {detail}")]
    OperationFailed { operation: String, detail: String },

    /// The configured attempt cap or deadline was reached first.
    #[error("Operation {operation} still running after {attempts} status checks")]
    Timeout { operation: String, attempts: u32 },

    /// The caller cancelled the wait.
    #[error("Stopped waiting for operation {operation}")]
    Cancelled { operation: String },

    /// Querying the operation status failed.
    #[error("Failed to query operation status: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors from the CIDR allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    /// Every sub-block of the parent range is in use.
    #[error("No free /{prefix} block left in {parent}")]
    Exhausted { parent: String, prefix: u8 },

    /// Requested block is not narrower than the parent, or wider than /32.
    #[error("Cannot split /{parent_prefix} into /{prefix} blocks")]
    InvalidPrefix { parent_prefix: u8, prefix: u8 },

    /// Input could not be parsed as an IPv4 CIDR block.
    #[error("Invalid IPv4 CIDR block: {0}")]
    Parse(String),
}

/// The forward step of a provisioning attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateNetwork,
    CreateSubnetwork,
    CreateBastion,
    CreateFirewallRule,
    AuthenticateCli,
    CreateRouter,
    CreateNat,
    SubmitCluster,
    AwaitCluster,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateNetwork => write!(f, "create network"),
            Self::CreateSubnetwork => write!(f, "create subnetwork"),
            Self::CreateBastion => write!(f, "create bastion"),
            Self::CreateFirewallRule => write!(f, "create firewall rule"),
            Self::AuthenticateCli => write!(f, "authenticate gcloud"),
            Self::CreateRouter => write!(f, "create cloud router"),
            Self::CreateNat => write!(f, "create cloud NAT"),
            Self::SubmitCluster => write!(f, "submit cluster"),
            Self::AwaitCluster => write!(f, "await cluster"),
        }
    }
}

/// Errors from the provisioning path. The first one aborts the sequence.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A gateway call failed while running a step.
    #[error("Failed to {step} `{resource}`: {source}")]
    Step {
        step: ProvisionStep,
        resource: String,
        #[source]
        source: GatewayError,
    },

    /// A long-running operation started by a step did not succeed.
    #[error("Failed to {step} `{resource}`: {source}")]
    Operation {
        step: ProvisionStep,
        resource: String,
        #[source]
        source: PollError,
    },

    /// The provider rejected the cluster request before starting it.
    #[error("Cluster request for `{cluster}` failed validation: {detail}")]
    Validation { cluster: String, detail: String },

    /// A cluster with this name already exists in the region.
    #[error("Cluster `{cluster}` already exists in {region}")]
    Conflict { cluster: String, region: String },

    /// The region has no zones to place the bastion in.
    #[error("No zones available in region {region}")]
    NoZones { region: String },

    /// The bastion came up without a private address.
    #[error("Instance `{instance}` has no private address")]
    MissingAddress { instance: String },

    /// The cluster description is not usable.
    #[error("Invalid cluster spec: {0}")]
    InvalidSpec(String),
}

impl ProvisionError {
    /// The step this error aborted, if it came from one.
    #[must_use]
    pub fn step(&self) -> Option<ProvisionStep> {
        match self {
            Self::Step { step, .. } | Self::Operation { step, .. } => Some(*step),
            Self::Validation { .. } => Some(ProvisionStep::SubmitCluster),
            Self::NoZones { .. } | Self::MissingAddress { .. } => Some(ProvisionStep::CreateBastion),
            _ => None,
        }
    }
}

/// One teardown step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Teardown step name.
    pub step: String,
    /// Resource the step targeted.
    pub resource: String,
    /// Underlying error message.
    pub message: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`: {}", self.step, self.resource, self.message)
    }
}

/// Errors from the destruction and rollback paths.
#[derive(Error, Debug)]
pub enum DestroyError {
    /// One or more teardown steps failed; the rest were still attempted.
    #[error("{} teardown step(s) failed, manual cleanup may be required:\n{}", .failures.len(), format_failures(.failures))]
    Incomplete { failures: Vec<StepFailure> },
}

fn format_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}
