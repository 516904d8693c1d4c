//! # Initialization
//!
//! Operator start-up: rustls setup, tracing, metrics, the probe server,
//! the Kubernetes client and the reconciliation context.

use crate::config::{ControllerConfig, LogFormat, ServerConfig};
use crate::controller::reconciler::Context as ReconcileContext;
use crate::crd::{GlobalSopsSecret, SopsProvider, SopsSecret};
use crate::decryptor::SopsCli;
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::store::KubeStore;
use anyhow::{anyhow, Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub context: Arc<ReconcileContext>,
    pub server_state: Arc<ServerState>,
}

impl Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("context", &self.context)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Install the subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sops_operator=info".into());
    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Initialize the operator runtime
///
/// - rustls crypto provider
/// - tracing subscriber
/// - metrics registration
/// - probe server (waits until it is bound)
/// - Kubernetes client and store
/// - `sops` binary lookup
pub async fn initialize(
    controller_config: ControllerConfig,
    server_config: ServerConfig,
) -> Result<InitializationResult> {
    // must happen before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_existing| anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing(controller_config.log_format)?;

    info!("Starting SOPS operator v{}", env!("CARGO_PKG_VERSION"));
    info!("Controller configuration: {:?}", controller_config);

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let engine = SopsCli::locate(controller_config.sops_binary.as_deref())
        .context("Cannot decrypt anything without the sops binary")?;
    info!("Using sops binary at {}", engine.binary().display());

    let store = KubeStore::new(client.clone(), controller_config.controller_name.clone());
    let context = Arc::new(ReconcileContext::new(
        Arc::new(store),
        Arc::new(engine),
        controller_config,
    ));

    log_existing::<SopsProvider>(&client, "SopsProvider").await;
    log_existing::<SopsSecret>(&client, "SopsSecret").await;
    log_existing::<GlobalSopsSecret>(&client, "GlobalSopsSecret").await;

    info!("Operator initialized, starting watch loops...");
    Ok(InitializationResult {
        client,
        context,
        server_state,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Check that a CRD is installed and log how many objects it holds.
///
/// Failures are logged only; the watchers retry on their own.
async fn log_existing<K>(client: &Client, kind: &str)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let api: Api<K> = Api::all(client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => info!("Found {} existing {} resources", list.items.len(), kind),
        Err(e) => {
            error!("{} is not queryable: {}. Is the CRD installed?", kind, e);
            warn!("Continuing, the {} watcher will retry", kind);
        }
    }
}
