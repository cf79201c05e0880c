use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use podnet::cache::IdentityCache;
use podnet::cli::{format_dry_run, Args};
use podnet::cluster::kube::KubeWorkloadLister;
use podnet::config::{load_config_file, DaemonConfig};
use podnet::engine::http::HttpEngineClient;
use podnet::orchestrator::PodNetworkOrchestrator;
use podnet::reconciler::ActiveWorkloadReconciler;
use podnet::server::{create_router, serve, AppState};
use podnet::store::{FileStore, MemoryStore, MetadataStore};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let file_config = match args.config {
        Some(ref path) => match load_config_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => DaemonConfig::default(),
    };

    let config = args.apply(file_config);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }
    let node_name = config.resolve_node_name();

    // Dry-run mode: print resolved config and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &node_name));
        return;
    }

    if let Err(e) = run(config, node_name).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(config: DaemonConfig, node_name: String) -> anyhow::Result<()> {
    let listen = config.listen_addr()?;

    let store: Arc<dyn MetadataStore> = if config.ephemeral_store {
        warn!("Using an in-memory store: pod records will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let dir = config.store_dir();
        let store = FileStore::open(&dir)
            .with_context(|| format!("Failed to open store at {}", dir.display()))?;
        info!("Pod records stored under {}", dir.display());
        Arc::new(store)
    };

    let engine = HttpEngineClient::new(&config.engine_url, config.remote_timeout())
        .context("Failed to create network engine client")?;
    info!("Network engine at {}", engine.base_url());

    let kube = config.kube_config(&node_name);
    info!("Listing pods of node {} from {}", node_name, kube.api_url);
    let lister = KubeWorkloadLister::new(kube).context("Failed to create cluster client")?;

    let orchestrator = PodNetworkOrchestrator::new(
        store.clone(),
        Arc::new(engine),
        IdentityCache::new(),
        config.orchestrator_config(),
    );
    let reconciler = ActiveWorkloadReconciler::new(store, Arc::new(lister));
    let app = create_router(AppState::new(orchestrator, reconciler));

    info!("Starting podnet on {}", listen);
    info!("Endpoints:");
    info!("  POST /AddPod                   - Set up pod network");
    info!("  POST /DelPod                   - Tear down pod network");
    info!("  GET  /ActivePods               - Sandboxes of running pods");
    info!("  GET  /v1/pods/{{namespace}}/{{name}} - Stored pod record");
    info!("  GET  /health                   - Health check");

    serve(&listen, app)
        .await
        .with_context(|| format!("Server error on {}", listen))
}
