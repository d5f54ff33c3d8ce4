//! Galera operator - runs MariaDB Galera clusters declared as MariaDBCluster resources

mod config;
mod crds;
mod watchers;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use galera_cluster::controller::CONTROLLER_NAME;
use galera_cluster::{ClusterCache, Context, Controller, WorkQueue};

use crate::config::{ControllerArgs, ControllerConfig};

/// Filter used when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "info,galera=debug,kube=info";

/// Galera operator - bootstraps, operates and recovers MariaDB Galera clusters
#[derive(Parser, Debug)]
#[command(name = "galera-operator", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Print the MariaDBCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    controller: ControllerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches MariaDBCluster resources and the StatefulSets and ConfigMaps
    /// around them, and drives every cluster through bootstrap, normal
    /// operation and quorum recovery.
    Controller(ControllerArgs),
}

impl Cli {
    fn controller_args(self) -> ControllerArgs {
        match self.command {
            Some(Commands::Controller(args)) => args,
            None => self.controller,
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crds::crd_yaml()?);
        return Ok(());
    }

    let args = cli.controller_args();
    init_tracing(args.log_json);
    run_controller(ControllerConfig::from(&args)).await
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    info!(
        workers = config.workers,
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        "Starting Galera operator"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    crds::ensure_crds_installed(&client).await?;

    let queue = WorkQueue::new(CONTROLLER_NAME, config.rate_limiter.clone());
    let watchers::Watchers { cache, tasks } =
        watchers::start(&client, config.namespace.as_deref(), &queue);

    cache
        .wait_for_sync(config.cache_sync_timeout)
        .await
        .context("initial cache sync failed")?;

    let cache: Arc<dyn ClusterCache> = Arc::new(cache);
    let ctx = Arc::new(Context::builder(client, cache).build());
    let controller = Arc::new(Controller::new(queue.clone(), ctx));
    let workers = tokio::spawn(controller.run(config.workers));

    shutdown_signal().await?;
    info!("Shutdown requested, draining in-flight work");
    queue.shutdown();
    workers.await.context("sync worker pool panicked")?;

    for task in tasks {
        task.abort();
    }
    info!("Galera operator stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
