//! GKE cluster provisioning and teardown.
//!
//! This crate creates a Kubernetes Engine cluster together with the
//! resources it depends on and removes them again:
//!
//! - **Network** - optional custom VPC network and private subnetwork
//! - **Bastion** - SSH entry point for private clusters, with firewall rule,
//!   cloud router and NAT
//! - **Cluster** - one node pool per worker group, awaited to completion
//!
//! Failed creations can be rolled back from the log of created resources.
//!
//! # Example
//!
//! ```rust,ignore
//! use gke_ops::{ClusterSpec, NetworkMode, OperationPoller, ProvisioningOrchestrator, Unattended};
//!
//! let gateway = settings.gateway()?;
//! let operator = Unattended::rollback_on_failure();
//! let orchestrator = ProvisioningOrchestrator::new(&gateway, settings.poller(), &operator);
//! let created = orchestrator.create(spec).await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cidr;
pub mod cluster;
pub mod config;
pub mod destroy;
pub mod error;
pub mod gateway;
pub mod names;
pub mod operator;
pub mod poller;
pub mod provision;
pub mod request;

pub use cluster::{ClusterSpec, NetworkMode, WorkerGroupSpec};
pub use config::Settings;
pub use destroy::DestructionOrchestrator;
pub use error::{CidrError, DestroyError, GatewayError, PollError, ProvisionError};
pub use gateway::{Gcp, OperationHandle, OperationStatus, ResourceGateway};
pub use operator::{Operator, Unattended};
pub use poller::{OperationPoller, PollConfig};
pub use provision::{ProvisionFailure, ProvisioningOrchestrator, ResourceLog, RollbackOutcome};
