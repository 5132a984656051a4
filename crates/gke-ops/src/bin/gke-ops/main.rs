//! gke-ops CLI - create and destroy GKE clusters with their supporting resources.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gke_ops::cidr::{self, DEFAULT_MASTER_BLOCK};
use gke_ops::config::{self, Settings, DEFAULT_CREDENTIALS_FILE};
use gke_ops::provision::{ensure_unique_name, used_master_ranges};
use gke_ops::request::location_path;
use gke_ops::{
    DestructionOrchestrator, Gcp, Operator, ProvisioningOrchestrator, ResourceGateway, Unattended,
};

mod prompts;
mod ui;

/// gke-ops - provision and tear down GKE clusters.
#[derive(Parser)]
#[command(name = "gke-ops")]
#[command(about = "Provision and tear down GKE clusters with their network, bastion and NAT")]
#[command(version)]
struct Cli {
    /// GCP project ID (or set `GCP_PROJECT_ID` env var).
    #[arg(long, env = "GCP_PROJECT_ID")]
    project: String,

    /// `OAuth2` access token for the Compute and Kubernetes Engine APIs.
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Service account key used to authenticate `gcloud`.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_FILE)]
    credentials_file: PathBuf,

    /// Service account the bastion runs as.
    #[arg(long, env = "GCP_SERVICE_ACCOUNT_EMAIL")]
    service_account_email: Option<String>,

    /// Region (prompted for when omitted).
    #[arg(long, env = "GCP_REGION")]
    region: Option<String>,

    /// Delay between operation status checks, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Stop waiting for an operation after this many seconds.
    #[arg(long)]
    poll_timeout_secs: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cluster.
    Create {
        /// TOML cluster description; prompts are used when omitted.
        #[arg(long, value_name = "FILE")]
        spec_file: Option<PathBuf>,

        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,

        /// With --yes, delete created resources if provisioning fails.
        #[arg(long, requires = "yes")]
        rollback_on_failure: bool,
    },

    /// Destroy a cluster and everything created with it.
    Destroy {
        /// Cluster name; chosen from a list when omitted.
        #[arg(long)]
        cluster: Option<String>,

        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// List clusters.
    List,

    /// Print the next free master range for a private cluster.
    NextMasterCidr,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            project_id: self.project.clone(),
            access_token: self.access_token.clone(),
            credentials_file: self.credentials_file.clone(),
            service_account_email: self.service_account_email.clone(),
            region: self.region.clone(),
            poll: Settings::poll_config(self.poll_interval_ms, self.poll_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,gke_ops=debug")
    } else {
        EnvFilter::new("warn,gke_ops=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings = cli.settings();
    settings.validate()?;
    let gateway = settings
        .gateway()
        .context("Failed to create GCP client")?;

    match cli.command {
        Commands::Create {
            spec_file,
            yes,
            rollback_on_failure,
        } => create(&settings, &gateway, spec_file, yes, rollback_on_failure).await,
        Commands::Destroy { cluster, yes } => destroy(&settings, &gateway, cluster, yes).await,
        Commands::List => list(&settings, &gateway).await,
        Commands::NextMasterCidr => {
            let used = used_master_ranges(&gateway)
                .await
                .context("Failed to list master ranges in use")?;
            println!("{}", cidr::select_master_block(true, &used)?);
            Ok(())
        }
    }
}

/// Cancel pending operation waits on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no longer waiting for operations");
            cancel.cancel();
        }
    });
    token
}

async fn create(
    settings: &Settings,
    gateway: &Gcp,
    spec_file: Option<PathBuf>,
    yes: bool,
    rollback_on_failure: bool,
) -> Result<()> {
    let spec = match spec_file {
        Some(path) => {
            let file = config::load_cluster_spec(&path)?;
            let master_block = if file.private_nodes && file.master_cidr_block.is_none() {
                prompts::allocate_master_block(gateway, !yes).await?
            } else {
                DEFAULT_MASTER_BLOCK
            };
            file.into_spec(&settings.project_id, settings.region.as_deref(), master_block)?
        }
        None => prompts::configure_cluster(settings, gateway).await?,
    };

    ensure_unique_name(gateway, &spec).await?;
    ui::print_settings_summary(&spec);

    if !yes {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Create this cluster?")
            .default(true)
            .interact()?;
        if !proceed {
            println!("{}", "Cluster creation cancelled.".yellow());
            return Ok(());
        }
    }

    let operator: Box<dyn Operator> = if !yes {
        Box::new(prompts::Interactive::new())
    } else if rollback_on_failure {
        Box::new(Unattended::rollback_on_failure())
    } else {
        Box::new(Unattended::keep_on_failure())
    };
    let poller = settings.poller().with_cancellation(cancel_on_ctrl_c());
    let orchestrator = ProvisioningOrchestrator::new(gateway, poller, operator.as_ref())
        .with_bastion_service_account(settings.service_account_email.clone());

    ui::print_section("Provisioning");
    match orchestrator.create(spec).await {
        Ok(created) => {
            ui::print_success(&format!("Cluster `{}` is ready", created.name));
            ui::print_access_instructions(&created);
            Ok(())
        }
        Err(failure) => {
            ui::print_failure(&failure);
            Err(failure.into())
        }
    }
}

async fn destroy(
    settings: &Settings,
    gateway: &Gcp,
    cluster: Option<String>,
    yes: bool,
) -> Result<()> {
    let region = match &settings.region {
        Some(region) => region.clone(),
        None if yes => bail!("--region is required with --yes"),
        None => prompts::region(settings)?,
    };
    let cluster = match cluster {
        Some(cluster) => cluster,
        None if yes => bail!("--cluster is required with --yes"),
        None => prompts::select_cluster(gateway, &settings.project_id, &region).await?,
    };

    if !yes {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Destroy cluster `{cluster}` in {region} and all of its resources?"
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
    }

    let operator: Box<dyn Operator> = if yes {
        Box::new(Unattended::keep_on_failure())
    } else {
        Box::new(prompts::Interactive::new())
    };
    let poller = settings.poller().with_cancellation(cancel_on_ctrl_c());

    ui::print_section("Destroying");
    DestructionOrchestrator::new(gateway, poller, operator.as_ref(), &settings.project_id)
        .destroy(&cluster, &region)
        .await
        .map_err(|e| {
            ui::print_error(&e.to_string());
            e
        })?;

    info!(cluster = %cluster, "Cluster destroyed");
    ui::print_success(&format!("Cluster `{cluster}` and its resources are gone"));
    Ok(())
}

async fn list(settings: &Settings, gateway: &Gcp) -> Result<()> {
    // `-` lists every location.
    let location = settings.region.as_deref().unwrap_or("-");
    let clusters = gateway
        .list_cluster_names(&location_path(&settings.project_id, location))
        .await
        .context("Failed to list clusters")?;

    if clusters.is_empty() {
        ui::print_info("No clusters found");
        return Ok(());
    }

    ui::print_section(&format!("Clusters in {}", settings.project_id));
    for name in clusters {
        println!("  {}", name.cyan());
    }
    Ok(())
}
