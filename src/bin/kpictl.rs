//! kpictl: operator interface to the KPI metrics engine.

use clap::{Parser, Subcommand};
use kpi_metrics::backend::BackendKind;
use kpi_metrics::catalog::Catalog;
use kpi_metrics::config::Config;
use kpi_metrics::push::{PushClient, spawn_periodic_push};
use kpi_metrics::telemetry::{TelemetryConfig, init_telemetry};
use kpi_metrics::{Engine, service};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kpictl", about = "Declarative KPI metrics registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a KPI catalog and print what it declares
    Validate {
        /// Path to the catalog JSON file
        catalog: PathBuf,
    },
    /// Register a catalog and push one snapshot to a gateway
    Push {
        /// Path to the catalog JSON file
        #[arg(long)]
        catalog: PathBuf,
        /// Gateway base URL (e.g. http://localhost:9091)
        #[arg(long)]
        gateway: String,
        /// Job name the snapshot is grouped under
        #[arg(long, default_value = "kpi-metrics")]
        job: String,
        /// Touch every KPI with default labels before pushing
        #[arg(long)]
        defaults: bool,
        /// Backend to export through (prometheus | memory)
        #[arg(long, default_value = "prometheus")]
        backend: BackendKind,
        /// Prefix for exported metric names
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Run the HTTP service, configured from the environment
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { catalog } => cmd_validate(catalog),
        Command::Push {
            catalog,
            gateway,
            job,
            defaults,
            backend,
            namespace,
        } => cmd_push(catalog, gateway, job, defaults, backend, namespace).await,
        Command::Serve => cmd_serve().await,
    }
}

fn cmd_validate(path: PathBuf) -> anyhow::Result<()> {
    let catalog = Catalog::from_path(&path)?;

    println!("{:<40}  {:<8}  LABELS", "NAME", "KIND");
    println!("{}", "-".repeat(80));
    for kpi in catalog.iter() {
        let labels: Vec<&str> = kpi.label_keys.iter().map(String::as_str).collect();
        let labels = if labels.is_empty() {
            "-".to_string()
        } else {
            labels.join(",")
        };
        println!("{:<40}  {:<8}  {}", kpi.name, kpi.kind.to_string(), labels);
    }

    println!("\n{} KPI(s) in {}", catalog.len(), path.display());
    Ok(())
}

async fn cmd_push(
    catalog: PathBuf,
    gateway: String,
    job: String,
    defaults: bool,
    backend: BackendKind,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    let mut engine = Engine::new(backend, namespace.as_deref())?;
    engine.load_catalog(&catalog)?;
    engine.register_metrics()?;

    if defaults {
        engine.push_with_defaults(&gateway, &job).await?;
    } else {
        engine.push(&gateway, &job).await?;
    }

    println!("Pushed {} metric(s) to {gateway} as job {job}", engine.list_metrics().len());
    Ok(())
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "kpi-metrics".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let mut pusher = PushClient::new(config.push_timeout);
    if let Some(token) = config.pushgateway_token.clone() {
        pusher = pusher.with_token(token);
    }

    let mut engine =
        Engine::new(config.backend, config.namespace.as_deref())?.with_push_client(pusher);
    engine.load_catalog(&config.catalog_path)?;
    engine.register_metrics()?;
    let engine = Arc::new(engine);

    let periodic = config
        .push_target()
        .map(|target| spawn_periodic_push(Arc::clone(&engine), target, config.push_interval));

    service::serve(Arc::clone(&engine), config.listen_addr, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    if let Some(periodic) = periodic {
        periodic.shutdown().await;
    }
    Ok(())
}
