//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ppe_api::error::init_error_details;
use ppe_api::{create_router, metrics, ApiConfig, AppState};
use ppe_worker::{JobExecutor, JobRegistry, RetentionSweeper, VideoProcessor, WorkerConfig};

const DEFAULT_LOG_FILTER: &str = "ppe=info,ort=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env();
    init_tracing(config.log_json);
    init_error_details(&config);

    info!("Starting ppe-api");
    info!("API config: host={}, port={}", config.host, config.port);

    let worker_config = WorkerConfig::from_env();
    worker_config
        .ensure_dirs()
        .await
        .context("failed to create upload/output directories")?;

    // The model is loaded exactly once; without it there is nothing to serve
    let registry = JobRegistry::new();
    let processor = match VideoProcessor::new(worker_config.clone(), registry.clone()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(
                model = %worker_config.model_path.display(),
                "Error loading model: {}",
                e.user_message()
            );
            std::process::exit(1);
        }
    };
    info!(
        classes = ?processor.class_names(),
        "Loaded model {}",
        worker_config.model_path.display()
    );

    let (executor, executor_handle) = JobExecutor::start(Arc::clone(&processor), &worker_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = RetentionSweeper::new(registry.clone(), worker_config.retention);
    let sweeper_handle = if sweeper.enabled() {
        Some(tokio::spawn(async move { sweeper.run(shutdown_rx).await }))
    } else {
        info!("Retention disabled, job files are kept until deleted");
        None
    };

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let state = AppState::new(config.clone(), Arc::clone(&processor), Arc::clone(&executor));
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("HTTP server stopped, draining jobs");
    let _ = shutdown_tx.send(true);
    executor.shutdown().await;
    if let Err(e) = executor_handle.await {
        warn!("Executor task ended abnormally: {}", e);
    }
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
