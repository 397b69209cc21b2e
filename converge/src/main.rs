//! Converge CLI
//!
//! Command-line interface for the convergence pipeline.
//!
//! # Usage
//!
//! ```bash
//! converge plan
//! converge apply --config deploy.json
//! converge destroy --state converge.state.json
//! converge inventory --region eu-west-1 --output reports/
//! ```

use clap::{Parser, Subcommand};
use converge::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Convergence pipeline for declarative cloud deployments", long_about = None)]
struct Cli {
    /// Path to the deployment configuration file
    #[arg(long, short, env = "CONVERGE_CONFIG", default_value = "converge.json")]
    config: PathBuf,

    /// Path to the convergence state file
    #[arg(long, env = "CONVERGE_STATE", default_value = "converge.state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stage execution order without touching anything
    Plan {
        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Converge all stages in dependency order
    Apply,
    /// Tear down recorded stages in reverse dependency order
    Destroy,
    /// Enumerate live resources and write a report
    Inventory {
        /// Region to scan (defaults to the configured region)
        #[arg(long)]
        region: Option<String>,
        /// Directory reports are written to
        #[arg(long, default_value = "reports")]
        output: PathBuf,
        /// How many reports to retain before pruning the oldest
        #[arg(long, default_value_t = 30)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "converge failed");
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), ConvergeError> {
    let config = DeploymentConfig::load(&cli.config)?;

    match cli.command {
        Commands::Plan { json } => {
            config.validate()?;
            let sequencer = build_sequencer(&config, &cli.state)?;
            let order = sequencer.plan()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&order)?);
            } else {
                println!("Execution plan ({} stages):", order.len());
                for (index, id) in order.iter().enumerate() {
                    let deps = sequencer
                        .specs()
                        .iter()
                        .find(|spec| &spec.id == id)
                        .map(|spec| spec.depends_on.join(", "))
                        .unwrap_or_default();
                    if deps.is_empty() {
                        println!("  {}. {id}", index + 1);
                    } else {
                        println!("  {}. {id}  (after: {deps})", index + 1);
                    }
                }
            }
        }
        Commands::Apply => {
            config.validate()?;
            let sequencer = build_sequencer(&config, &cli.state)?;
            let report = sequencer.apply().await?;
            println!(
                "Apply complete: {} executed, {} skipped",
                report.executed.len(),
                report.skipped.len()
            );
            if let Some(edge) = report.handles.get(ids::EDGE) {
                if let Some(dns_name) = edge.output_str("load_balancer_dns_name") {
                    println!("{} -> {dns_name}", config.domain);
                }
            }
        }
        Commands::Destroy => {
            config.validate()?;
            let sequencer = build_sequencer(&config, &cli.state)?;
            let report = sequencer.destroy().await?;
            println!(
                "Destroy complete: {} destroyed, {} skipped",
                report.destroyed.len(),
                report.skipped.len()
            );
        }
        Commands::Inventory {
            region,
            output,
            keep,
        } => {
            let provider: Arc<dyn CloudProvider> =
                Arc::new(RestCloudProvider::new(&config.provider_endpoint)?);
            let region = region.unwrap_or_else(|| config.region.clone());
            let collector = InventoryCollector::new(converge::inventory::default_scanners(provider));
            let report = collector.collect(&region).await;

            let store = ReportStore::new(output, keep);
            let path = store.save(&report).await?;
            println!(
                "Inventory complete: {} services scanned, {} failed, {} resources ({})",
                report.services.len(),
                report.failed(),
                report.resource_count(),
                path.display()
            );
        }
    }
    Ok(())
}

fn build_sequencer(config: &DeploymentConfig, state_path: &Path) -> Result<Sequencer, ConvergeError> {
    let provider = Arc::new(RestCloudProvider::new(&config.provider_endpoint)?);
    let authority: Arc<dyn CertificateAuthority> = provider.clone();
    let registrar = Arc::new(PorkbunClient::from_config(&config.registrar)?);
    let delegation_client = DelegationClient::new(registrar);
    let store = Arc::new(JsonStateStore::new(state_path));

    let network = NetworkProvisioner::new(
        provider.clone(),
        &config.project,
        &config.region,
        config.network.clone(),
    );
    let security =
        SecurityProvisioner::new(provider.clone(), &config.project, config.security.clone());
    let zone = ZoneProvisioner::new(provider.clone(), &config.domain);
    let delegation = DelegationProvisioner::new(delegation_client, &config.domain);
    let certificate = CertificateProvisioner::new(
        provider.clone(),
        authority,
        &config.domain,
        config.validation.clone(),
    );
    let edge = EdgeProvisioner::new(
        provider,
        &config.project,
        &config.domain,
        config.compute.clone(),
    );

    Ok(Sequencer::new(store)
        .stage(StageSpec::new(Arc::new(network)))
        .stage(StageSpec::new(Arc::new(security)).depends_on(ids::NETWORK))
        .stage(StageSpec::new(Arc::new(zone)).depends_on(ids::NETWORK))
        .stage(StageSpec::new(Arc::new(delegation)).depends_on(ids::ZONE))
        .stage(StageSpec::new(Arc::new(certificate)).depends_on(ids::DELEGATION))
        .stage(
            StageSpec::new(Arc::new(edge))
                .depends_on(ids::CERTIFICATE)
                .depends_on(ids::SECURITY),
        ))
}
