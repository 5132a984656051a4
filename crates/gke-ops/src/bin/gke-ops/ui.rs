//! Console output for the CLI.

use colored::Colorize;

use gke_ops::cluster::scopes;
use gke_ops::provision::{ProvisionFailure, RollbackOutcome};
use gke_ops::{names, ClusterSpec};

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn print_field(label: &str, value: &str) {
    println!("  {:<20} {}", format!("{label}:").bright_black(), value);
}

/// Everything about to be created, for the operator to confirm.
pub fn print_settings_summary(spec: &ClusterSpec) {
    print_section("Cluster Settings");

    print_field("Project", &spec.project_id);
    print_field("Cluster", &spec.name);
    print_field("Region", &spec.region);
    let network = if spec.custom_network {
        format!("{} (new)", spec.network)
    } else {
        spec.network.clone()
    };
    print_field("Network", &network);
    print_field("Subnetwork", &spec.subnetwork);
    if spec.enable_private_nodes {
        print_field("Topology", "private (bastion + NAT)");
        print_field("Master range", &spec.master_cidr_block.to_string());
        print_field("Bastion", &names::bastion(&spec.name));
    } else {
        print_field("Topology", "public");
    }
    print_field(
        "Stackdriver",
        if spec.enable_stackdriver { "enabled" } else { "disabled" },
    );

    println!();
    for (pool, worker) in spec.node_pool_names().iter().zip(&spec.workers) {
        let nodes = if worker.autoscaling {
            format!(
                "{}-{} nodes (autoscaling)",
                worker.min_nodes.unwrap_or(worker.desired_nodes),
                worker.max_nodes.unwrap_or(worker.desired_nodes)
            )
        } else {
            format!("{} nodes", worker.desired_nodes)
        };
        println!(
            "  {} {} {}",
            pool.cyan(),
            worker.machine_type.bold(),
            nodes.bright_black()
        );
        for scope in &worker.oauth_scopes {
            println!("      {}", scopes::label(scope).unwrap_or(scope.as_str()));
        }
    }
    println!();
}

/// How to reach the new cluster.
pub fn print_access_instructions(spec: &ClusterSpec) {
    print_section("Access");
    if spec.enable_private_nodes {
        print_info("The master is only reachable through the bastion:");
        println!(
            "    gcloud compute ssh {} --project {}",
            names::bastion(&spec.name),
            spec.project_id
        );
        print_info("kubectl credentials are fetched on login by the bastion's profile script.");
    } else {
        print_info("Fetch kubectl credentials with:");
        println!(
            "    gcloud container clusters get-credentials {} --region {} --project {}",
            spec.name, spec.region, spec.project_id
        );
    }
    println!();
}

/// Report a failed creation and what happened to its resources.
pub fn print_failure(failure: &ProvisionFailure) {
    print_error(&failure.to_string());
    match &failure.rollback {
        RollbackOutcome::NothingCreated => print_info("No resources were created."),
        RollbackOutcome::Completed => print_success("Rolled back every created resource."),
        RollbackOutcome::Declined => {
            print_warning("Created resources were left in place:");
            for resource in failure.created.entries() {
                println!("    {} {} ({})", resource.kind, resource.name, resource.location);
            }
        }
        RollbackOutcome::Incomplete(e) => print_error(&e.to_string()),
    }
}
