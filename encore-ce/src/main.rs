//! encore-ce - performance comparison service
//!
//! Scores a recorded performance against a reference (audio and/or a note
//! transcription). Work is submitted over HTTP as jobs, executed by a fixed
//! worker pool and observable through polling or SSE.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use encore_common::config::{RootFolderInitializer, RootFolderResolver};
use encore_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use encore_ce::config::{ConfigOverrides, ServiceConfig, MODULE_NAME};
use encore_ce::db::{SqliteStore, Store};
use encore_ce::services::{
    DisabledFeedback, FeedbackGenerator, HttpFeedbackGenerator, JobOrchestrator, Pipeline,
    SegmentInference, UnavailableTechniqueClassifier, WorkerPool, YinPitchEstimator,
};
use encore_ce::AppState;

/// Command-line arguments for encore-ce
#[derive(Parser, Debug)]
#[command(name = "encore-ce")]
#[command(about = "Performance comparison engine")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ENCORE_CE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "ENCORE_CE_BIND")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "ENCORE_CE_PORT")]
    port: Option<u16>,

    /// Concurrent jobs
    #[arg(short, long, env = "ENCORE_CE_WORKERS")]
    workers: Option<usize>,

    /// Data directory holding the database
    #[arg(short, long, env = "ENCORE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Text-generation endpoint for practice feedback
    #[arg(long, env = "ENCORE_FEEDBACK_ENDPOINT")]
    feedback_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        bind_address: args.bind,
        port: args.port,
        workers: args.workers,
        root_folder: args.root_folder,
        feedback_endpoint: args.feedback_endpoint,
    });

    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("encore_ce={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {} v{} ({})", MODULE_NAME, env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!("Built {} [{}]", env!("BUILD_TIMESTAMP"), env!("BUILD_PROFILE"));

    config.validate().context("Invalid configuration")?;

    // Root folder: CLI/ENV/TOML, then the shared resolver
    let root_folder = match config.root_folder.clone() {
        Some(root_folder) => root_folder,
        None => RootFolderResolver::new(MODULE_NAME).resolve(),
    };
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let sqlite = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .context("Failed to open database")?,
    );
    let store: Arc<dyn Store> = sqlite.clone();

    let event_bus = EventBus::new(config.server.event_capacity);

    let inference = SegmentInference::new(
        Arc::new(YinPitchEstimator::default()),
        Arc::new(UnavailableTechniqueClassifier),
    );
    let pipeline = Arc::new(Pipeline::from_config(&config, inference));

    let feedback: Arc<dyn FeedbackGenerator> =
        match HttpFeedbackGenerator::from_config(&config.feedback)
            .context("Failed to build feedback client")?
        {
            Some(client) => {
                info!("Feedback generation enabled");
                Arc::new(client)
            }
            None => {
                info!("Feedback generation disabled (no endpoint configured)");
                Arc::new(DisabledFeedback)
            }
        };

    let orchestrator =
        JobOrchestrator::new(pipeline, Arc::clone(&store), event_bus.clone(), feedback);
    let pool = WorkerPool::new(orchestrator, config.workers.clone(), event_bus.clone());
    let workers = pool.start();
    let redelivered = pool
        .requeue_incomplete()
        .await
        .context("Failed to redeliver incomplete jobs")?;
    info!(redelivered, "Worker pool ready");

    let state = AppState::new(Arc::new(pool.clone()), store, event_bus);
    let app = encore_ce::build_router(state, config.server.max_body_bytes);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Worker task ended abnormally");
        }
    }
    sqlite.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
