//! Interactive configuration.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, MultiSelect, Select};
use ipnet::Ipv4Net;
use tracing::warn;

use gke_ops::cidr::{self, DEFAULT_MASTER_BLOCK};
use gke_ops::cluster::{scopes, validate_name};
use gke_ops::error::{CidrError, ProvisionError};
use gke_ops::gateway::Instance;
use gke_ops::provision::{used_master_ranges, ResourceLog};
use gke_ops::request::location_path;
use gke_ops::{ClusterSpec, NetworkMode, Operator, ResourceGateway, Settings, WorkerGroupSpec};

use crate::ui;

const DEFAULT_REGION: &str = "us-central1";
const DEFAULT_MACHINE_TYPE: &str = "e2-standard-4";

/// Asks the person at the terminal.
pub struct Interactive {
    theme: ColorfulTheme,
}

impl Interactive {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Operator for Interactive {
    fn confirm_rollback(&self, error: &ProvisionError, created: &ResourceLog) -> bool {
        ui::print_error(&error.to_string());
        ui::print_info("Created so far:");
        for resource in created.entries() {
            println!("    {} {}", resource.kind, resource.name.bold());
        }
        Confirm::with_theme(&self.theme)
            .with_prompt("Delete these resources?")
            .default(true)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Prompt failed, keeping resources");
                false
            })
    }

    fn choose_bastion(&self, candidates: &[Instance]) -> Option<usize> {
        let mut items: Vec<String> = candidates
            .iter()
            .map(|i| {
                format!(
                    "{} in {} ({})",
                    i.name,
                    i.zone,
                    i.public_ip.as_deref().unwrap_or("no public IP")
                )
            })
            .collect();
        items.push("Skip, delete none of them".to_string());

        match Select::with_theme(&self.theme)
            .with_prompt("Several bastions match, which one belongs to this cluster?")
            .default(0)
            .items(&items)
            .interact()
        {
            Ok(index) if index < candidates.len() => Some(index),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Prompt failed, skipping bastion");
                None
            }
        }
    }
}

/// Build a cluster spec from prompts.
pub async fn configure_cluster<G>(settings: &Settings, gateway: &G) -> Result<ClusterSpec>
where
    G: ResourceGateway + ?Sized,
{
    let theme = ColorfulTheme::default();

    println!();
    println!("{}", "Let's configure your GKE cluster.".cyan().bold());
    println!();

    let region = prompt_region(&theme, settings)?;
    let taken = gateway
        .list_cluster_names(&location_path(&settings.project_id, &region))
        .await
        .context("Failed to list clusters")?;

    let name: String = Input::with_theme(&theme)
        .with_prompt("Cluster name")
        .validate_with(|input: &String| check_name(input, &region, &taken))
        .interact_text()?;

    let network_options = [
        "Create a dedicated network",
        "Use the default network",
        "Use an existing network",
    ];
    let network_idx = Select::with_theme(&theme)
        .with_prompt("Network")
        .default(0)
        .items(&network_options)
        .interact()?;
    let network = match network_idx {
        1 => NetworkMode::Default,
        2 => NetworkMode::Existing {
            network: Input::with_theme(&theme)
                .with_prompt("Network name")
                .interact_text()?,
            subnetwork: Input::with_theme(&theme)
                .with_prompt("Subnetwork name")
                .interact_text()?,
        },
        _ => NetworkMode::Custom,
    };

    let private = Confirm::with_theme(&theme)
        .with_prompt("Private cluster (internal master, reached through a bastion)?")
        .default(true)
        .interact()?;

    let stackdriver = Confirm::with_theme(&theme)
        .with_prompt("Send logs and metrics to Cloud Logging and Monitoring?")
        .default(false)
        .interact()?;

    let mut spec = ClusterSpec::new(&settings.project_id, name, region, &network)
        .with_stackdriver(stackdriver);
    if private {
        let block = allocate_master_block(gateway, true).await?;
        spec = spec.with_private_nodes(block);
    }

    loop {
        let index = spec.workers.len();
        spec = spec.with_worker(prompt_worker(&theme, index)?);
        let more = Confirm::with_theme(&theme)
            .with_prompt("Add another worker group?")
            .default(false)
            .interact()?;
        if !more {
            break;
        }
    }

    spec.validate()?;
    Ok(spec)
}

/// Name rules plus uniqueness within the region.
fn check_name(name: &str, region: &str, taken: &[String]) -> Result<(), String> {
    validate_name(name).map_err(|e| e.to_string())?;
    if taken.iter().any(|existing| existing == name) {
        return Err(format!("a cluster named `{name}` already exists in {region}"));
    }
    Ok(())
}

fn prompt_region(theme: &ColorfulTheme, settings: &Settings) -> Result<String> {
    let region = Input::with_theme(theme)
        .with_prompt("Region")
        .default(
            settings
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        )
        .interact_text()?;
    Ok(region)
}

fn prompt_worker(theme: &ColorfulTheme, index: usize) -> Result<WorkerGroupSpec> {
    println!();
    println!("{}", format!("Worker group {index}").bold());

    let machine_type: String = Input::with_theme(theme)
        .with_prompt("Machine type")
        .default(DEFAULT_MACHINE_TYPE.to_string())
        .interact_text()?;

    let oauth_scopes = prompt_scopes(theme)?;

    let autoscaling = Confirm::with_theme(theme)
        .with_prompt("Enable autoscaling?")
        .default(false)
        .interact()?;

    if autoscaling {
        let min: u32 = Input::with_theme(theme)
            .with_prompt("Minimum nodes")
            .default(1)
            .interact_text()?;
        let max: u32 = Input::with_theme(theme)
            .with_prompt("Maximum nodes")
            .default(min.max(3))
            .validate_with(move |max: &u32| {
                if *max >= min && *max > 0 {
                    Ok(())
                } else {
                    Err(format!("must be at least {}", min.max(1)))
                }
            })
            .interact_text()?;
        Ok(WorkerGroupSpec::autoscaled(machine_type, min, max, oauth_scopes))
    } else {
        let nodes: u32 = Input::with_theme(theme)
            .with_prompt("Nodes")
            .default(3)
            .validate_with(|n: &u32| if *n >= 1 { Ok(()) } else { Err("must be at least 1") })
            .interact_text()?;
        Ok(WorkerGroupSpec::fixed(machine_type, nodes, oauth_scopes))
    }
}

fn prompt_scopes(theme: &ColorfulTheme) -> Result<Vec<String>> {
    let options = [
        "Default access",
        "Full access to all Cloud APIs",
        "Set access for each API",
    ];
    let choice = Select::with_theme(theme)
        .with_prompt("Node access scopes")
        .default(0)
        .items(&options)
        .interact()?;

    Ok(match choice {
        1 => scopes::full_scopes(),
        2 => {
            let labels: Vec<&str> = scopes::CUSTOM.iter().map(|(label, _)| *label).collect();
            let picked = MultiSelect::with_theme(theme)
                .with_prompt("Additional scopes (space to toggle)")
                .items(&labels)
                .interact()?;
            let extra: Vec<&str> = picked.iter().map(|&i| scopes::CUSTOM[i].1).collect();
            scopes::custom_scopes(&extra)
        }
        _ => scopes::default_scopes(),
    })
}

/// Next free master range, asking for one when the pool is exhausted.
pub async fn allocate_master_block<G>(gateway: &G, interactive: bool) -> Result<Ipv4Net>
where
    G: ResourceGateway + ?Sized,
{
    let used = used_master_ranges(gateway)
        .await
        .context("Failed to list master ranges in use")?;
    match cidr::select_master_block(true, &used) {
        Ok(block) => Ok(block),
        Err(CidrError::Exhausted { .. }) if interactive => {
            ui::print_warning("Every /28 in 172.16.0.0/12 is taken, enter a range manually.");
            let input: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Master CIDR block")
                .default(DEFAULT_MASTER_BLOCK.to_string())
                .validate_with(|input: &String| {
                    cidr::validate_manual_block(input, &used)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .interact_text()?;
            Ok(cidr::validate_manual_block(&input, &used)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Pick an existing cluster in `region`.
pub async fn select_cluster<G>(gateway: &G, project: &str, region: &str) -> Result<String>
where
    G: ResourceGateway + ?Sized,
{
    let mut clusters = gateway
        .list_cluster_names(&location_path(project, region))
        .await
        .context("Failed to list clusters")?;
    if clusters.is_empty() {
        bail!("No clusters found in {region}");
    }
    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Cluster to destroy")
        .default(0)
        .items(&clusters)
        .interact()?;
    Ok(clusters.swap_remove(index))
}

/// Region from settings, or asked for.
pub fn region(settings: &Settings) -> Result<String> {
    match &settings.region {
        Some(region) => Ok(region.clone()),
        None => prompt_region(&ColorfulTheme::default(), settings),
    }
}
