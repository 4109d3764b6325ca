//! ODH Operator - reconciles Open Data Hub platform components

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;

use odh_common::crd::{Platform, Release};
use odh_common::telemetry::{init_telemetry, TelemetryConfig};
use odh_common::{DEFAULT_APPLICATIONS_NAMESPACE, DEFAULT_MANIFESTS_PATH};
use odh_components::{ControllerConfig, ManifestRoot};
use odh_controller::{ClusterClient, KubeClusterClient};
use odh_manifests::helm::DEFAULT_HELM_BINARY;
use odh_manifests::DiskFileSystem;
use odh_operator::components::default_registry;
use odh_operator::controller_runner::{build_component_controllers, build_dsc_controller};
use odh_operator::crds::{crds_yaml, ensure_crds_installed};
use odh_operator::startup::ensure_default_dsci;

/// Open Data Hub operator - deploys and reconciles data science platform components
#[derive(Parser, Debug)]
#[command(name = "odh-operator", version, about, long_about = None)]
struct Cli {
    /// Root of the shipped component manifests
    #[arg(long, env = "DEFAULT_MANIFESTS_PATH", default_value = DEFAULT_MANIFESTS_PATH)]
    manifests_path: PathBuf,

    /// Namespace component workloads are deployed into
    #[arg(long, env = "ODH_APPLICATIONS_NAMESPACE", default_value = DEFAULT_APPLICATIONS_NAMESPACE)]
    applications_namespace: String,

    /// Platform variant (OpenDataHub, SelfManagedRhoai, ManagedRhoai)
    #[arg(long, env = "ODH_PLATFORM_TYPE", default_value = "OpenDataHub")]
    platform: Platform,

    /// Version reported in status
    #[arg(long, env = "ODH_RELEASE_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    release_version: String,

    /// Helm executable for chart-based components
    #[arg(long, env = "ODH_HELM_BINARY", default_value = DEFAULT_HELM_BINARY)]
    helm_binary: String,

    /// Install or update the platform CRDs on startup
    #[arg(long, env = "ODH_INSTALL_CRDS", default_value_t = true, action = clap::ArgAction::Set)]
    install_crds: bool,

    /// Create a DSCInitialization when none exists
    #[arg(long, env = "ODH_CREATE_DEFAULT_DSCI", default_value_t = true, action = clap::ArgAction::Set)]
    create_default_dsci: bool,

    /// Seconds a deploy cache entry stays valid, 0 disables the cache
    #[arg(long, env = "ODH_DEPLOY_CACHE_TTL_SECS", default_value_t = 600)]
    deploy_cache_ttl_secs: u64,

    /// Human-readable logs instead of JSON
    #[arg(long, env = "ODH_TEXT_LOGS")]
    text_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default)
    Controller,
    /// Print the platform CRDs as YAML and exit
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Crd) = cli.command {
        print!("{}", crds_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json_logs: !cli.text_logs,
        ..Default::default()
    })?;

    run_controller(cli).await
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!(platform = %cli.platform, version = %cli.release_version, "ODH operator starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));
    if cli.create_default_dsci {
        ensure_default_dsci(cluster.as_ref(), &cli.applications_namespace).await?;
    }

    let root = ManifestRoot::new(&cli.manifests_path, Arc::new(DiskFileSystem));
    let registry = default_registry(root, cli.platform)?;
    registry.init_all(cli.platform)?;
    let registry = Arc::new(registry);

    let config = ControllerConfig {
        release: Release {
            name: cli.platform,
            version: cli.release_version.clone(),
        },
        deploy_cache_ttl: (cli.deploy_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(cli.deploy_cache_ttl_secs)),
        helm_binary: cli.helm_binary.clone(),
    };

    tracing::info!("starting controllers:");
    let mut controllers =
        build_component_controllers(client.clone(), cluster.clone(), &registry, &config)?;
    controllers.push(build_dsc_controller(client, cluster, registry, &config));

    futures::future::join_all(controllers).await;
    tracing::info!("controllers stopped");
    Ok(())
}
