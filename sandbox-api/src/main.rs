use std::sync::Arc;

use anyhow::{Context, Result};
use sandbox_api::{create_app, AppState, Config};
use sandbox_controller::{spawn_controllers, ClusterApi, KubeCluster};
use sandbox_logging::{init_subscriber, LogConfig};
use sandbox_notifier::{GatewayClient, Rendezvous, WorkspaceNotifier};
use sandbox_orchestrator::WorkspaceService;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()?;
    let _log_guard = init_subscriber(&log_config)?;

    info!("Starting sandboxd...");

    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        namespace = %config.namespace,
        mode = %config.mode,
        gateway = %config.gateway_url,
        "Configuration loaded"
    );
    if config.gateway_insecure {
        warn!("Gateway TLS certificate verification is disabled");
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create cluster client")?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client, &config.namespace));

    let shutdown = CancellationToken::new();

    let gateway = GatewayClient::new(config.gateway_config()).context("Failed to build gateway client")?;
    let mut tasks = gateway.spawn_workers(shutdown.clone());
    info!(workers = config.gateway_workers, "Gateway notifier started");

    let notifier = Arc::new(WorkspaceNotifier::new(Arc::new(gateway), Rendezvous::new()));
    tasks.extend(spawn_controllers(
        cluster.clone(),
        notifier.clone(),
        config.controller_config(),
        shutdown.clone(),
    ));
    info!(workers = config.reconcile_workers, "Controllers started");

    let service = WorkspaceService::new(cluster, notifier.clone(), config.service_config());
    let app = create_app(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    // In-flight requests may still be waiting for readiness, so the
    // controllers keep running until the server has drained.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    info!("Server stopped, shutting down controllers");
    shutdown.cancel();
    notifier.rendezvous().close();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }

    info!("sandboxd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
