//! Names of the ancillary resources created for a cluster.
//!
//! Every name is derived from the cluster name alone so that destruction can
//! find resources without any saved state.

const PREFIX: &str = "gke-ops";

/// Custom VPC network.
#[must_use]
pub fn network(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-network")
}

/// Private subnetwork inside the custom network.
#[must_use]
pub fn private_subnetwork(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-network-private-subnet")
}

/// Bastion instance. Also used as its network tag.
#[must_use]
pub fn bastion(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-bastion")
}

/// Firewall rule allowing SSH to the bastion.
#[must_use]
pub fn ssh_firewall_rule(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-bastion-allow-ssh")
}

/// Cloud router.
#[must_use]
pub fn cloud_router(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-cloud-router")
}

/// Cloud NAT attached to the router.
#[must_use]
pub fn cloud_nat(cluster: &str) -> String {
    format!("{PREFIX}-{cluster}-cloud-nat")
}

/// Node pool for the worker group at `index`.
#[must_use]
pub fn node_pool(cluster: &str, index: usize) -> String {
    format!("{cluster}-np-{index}")
}
