#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use drift_apply::{realize, DiffStrategy, ReconcileOptions, RealizeReport};
use drift_kubehub::{fetch_concurrency, fetch_current_state, ClusterClient, ClusterMap, KubeClusterClient, MockCluster};
use drift_store::ResourceInventory;
use serde::Serialize;
use tracing::{info, warn};

mod load;

#[derive(Parser, Debug)]
#[command(name = "driftctl", version, about = "Declarative cluster resource reconciler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Strategy { Semantic, ThreeWayDigest }

impl From<Strategy> for DiffStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Semantic => DiffStrategy::Semantic,
            Strategy::ThreeWayDigest => DiffStrategy::ThreeWayDigest,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile desired YAML against one cluster (dry run unless --apply)
    Reconcile(ReconcileArgs),
    /// Print the canonical form and digest of each document
    Canonicalize {
        /// YAML file with one or more documents
        file: String,
    },
}

#[derive(clap::Args, Debug)]
struct ReconcileArgs {
    /// YAML files with desired resources
    #[arg(required = true)]
    files: Vec<String>,
    /// Cluster name used for bookkeeping
    #[arg(long, env = "DRIFT_CLUSTER", default_value = "default")]
    cluster: String,
    /// Namespace for documents that do not set one
    #[arg(long = "ns", env = "DRIFT_NAMESPACE", default_value = "default")]
    namespace: String,
    #[arg(long, env = "DRIFT_INTEGRATION", default_value = "driftctl")]
    integration: String,
    #[arg(long, env = "DRIFT_INTEGRATION_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    integration_version: String,
    /// Identity issuing this run
    #[arg(long, env = "DRIFT_CALLER")]
    caller: Option<String>,
    /// Callers still configured for these resources (comma separated)
    #[arg(long, env = "DRIFT_ALL_CALLERS", value_delimiter = ',')]
    all_callers: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    take_over: bool,
    /// Use the privileged client for every action
    #[arg(long, action = ArgAction::SetTrue)]
    privileged: bool,
    #[arg(long = "no-deletion", action = ArgAction::SetTrue)]
    no_deletion: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    override_enable_deletion: bool,
    /// Types whose objects may be deleted without ownership annotations
    #[arg(long = "authoritative-type")]
    authoritative_types: Vec<String>,
    #[arg(long, value_enum, default_value_t = Strategy::Semantic)]
    strategy: Strategy,
    /// Execute actions instead of only planning them
    #[arg(long, action = ArgAction::SetTrue)]
    apply: bool,
    /// Plan against an empty in-memory cluster
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "apply")]
    offline: bool,
}

impl ReconcileArgs {
    fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            dry_run: !self.apply,
            caller: self.caller.clone(),
            all_callers: self.all_callers.clone(),
            take_over: self.take_over,
            privileged: self.privileged,
            enable_deletion: !self.no_deletion,
            override_enable_deletion: self.override_enable_deletion,
            authoritative_types: self.authoritative_types.clone(),
            strategy: self.strategy.into(),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("DRIFT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DRIFT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid DRIFT_METRICS_ADDR; expected host:port");
        }
    }
}

async fn run_reconcile(args: &ReconcileArgs, output: Output) -> Result<bool> {
    let ri = ResourceInventory::new();
    let mut specs = Vec::new();
    for file in &args.files {
        let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?;
        let docs = load::parse_documents(&text).with_context(|| format!("parsing {}", file))?;
        specs.extend(load::register_desired(
            &ri,
            &args.cluster,
            &args.namespace,
            docs,
            &args.integration,
            &args.integration_version,
            args.caller.as_deref(),
        )?);
    }

    let client: Arc<dyn ClusterClient> = if args.offline {
        Arc::new(MockCluster::new())
    } else {
        Arc::new(KubeClusterClient::try_default().await?)
    };
    let mut clusters = ClusterMap::new();
    clusters.insert(args.cluster.clone(), Arc::clone(&client));
    clusters.insert_privileged(args.cluster.clone(), client);

    fetch_current_state(specs, &ri, &clusters, &args.integration, &args.integration_version, fetch_concurrency()).await;
    let report = realize(&ri, &args.options(), &clusters).await;
    ri.publish_gauges(&args.integration);
    print_report(&report, output)?;
    Ok(!ri.has_error_registered(None))
}

fn print_report(report: &RealizeReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for a in &report.actions {
                println!(
                    "{:<7} {:<12} {:<16} {:<24} {:<32} {:?}",
                    a.verb(),
                    a.cluster,
                    a.namespace,
                    a.resource_type,
                    a.name(),
                    a.reason
                );
            }
            let mode = if report.dry_run { "dry run" } else { "applied" };
            println!(
                "{} action(s), {}: {} applied, {} deleted, {} failed",
                report.actions.len(),
                mode,
                report.applied,
                report.deleted,
                report.failed
            );
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct CanonicalDoc {
    kind: String,
    name: String,
    sha256sum: String,
    canonical: drift_core::Json,
}

fn run_canonicalize(file: &str, output: Output) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?;
    let mut out = Vec::new();
    for doc in load::parse_documents(&text)? {
        let resource = drift_core::Resource::new_unchecked(doc, "driftctl", env!("CARGO_PKG_VERSION"));
        out.push(CanonicalDoc {
            kind: resource.kind_and_group(),
            name: resource.name().to_string(),
            sha256sum: resource.sha256sum(),
            canonical: drift_core::canonicalize(resource.body()),
        });
    }
    match output {
        Output::Human => {
            for d in &out {
                println!("{} {} {}", d.kind, d.name, d.sha256sum);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&out)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Reconcile(args) => {
            info!(cluster = %args.cluster, dry_run = !args.apply, offline = args.offline, "reconcile invoked");
            if !run_reconcile(args, cli.output).await? {
                eprintln!("reconcile finished with errors");
                std::process::exit(1);
            }
        }
        Commands::Canonicalize { file } => run_canonicalize(file, cli.output)?,
    }
    Ok(())
}
