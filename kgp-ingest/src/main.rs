//! kgp-ingest - Knowledge ingestion service
//!
//! Admits content through the quality gate, governs its review lifecycle,
//! and runs bulk migrations from external systems.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kgp_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use kgp_common::events::EventBus;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kgp_ingest::db::settings::{load_admission_parameters, load_engine_parameters};
use kgp_ingest::migration::ConnectorRegistry;
use kgp_ingest::models::{AdmissionParameters, EngineParameters};
use kgp_ingest::AppState;

const MODULE_NAME: &str = "kgp-ingest";
const DEFAULT_PORT: u16 = 5731;
const DEFAULT_LOG_FILTER: &str = "kgp_ingest=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "kgp-ingest")]
#[command(about = "Knowledge ingestion, governance and migration service")]
#[command(version)]
struct Args {
    /// Port to listen on (default 5731)
    #[arg(short, long, env = "KGP_PORT")]
    port: Option<u16>,

    /// Root folder holding kgp.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default ~/.config/kgp/kgp-ingest.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_config_path(args.config.clone());
    let toml_config = resolver.toml_config().unwrap_or_default();

    init_tracing(&toml_config);

    info!("Starting kgp-ingest (Knowledge Ingest) service");
    info!(
        "Version: {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let root_folder = resolver.resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = kgp_ingest::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Settings table overrides TOML, which overrides compiled defaults
    let admission = load_admission_parameters(
        &db_pool,
        AdmissionParameters::default().with_overrides(&toml_config.admission),
    )
    .await
    .context("Invalid admission parameters")?;
    let engine_params = load_engine_parameters(
        &db_pool,
        EngineParameters::default().with_overrides(&toml_config.migration),
    )
    .await
    .context("Invalid migration parameters")?;
    info!(
        duplicate_threshold = admission.duplicate_threshold,
        quality_floor = admission.quality_floor,
        max_batch_size = engine_params.max_batch_size,
        "Admission parameters loaded"
    );

    let event_bus = EventBus::new(1000);
    let state = AppState::new(
        db_pool,
        event_bus,
        admission,
        engine_params,
        ConnectorRegistry::with_builtin(),
    );
    info!("Source connectors: {}", state.engine.connectors().systems().join(", "));

    state
        .engine
        .recover_interrupted_jobs()
        .await
        .context("Failed to recover interrupted migration jobs")?;

    let engine = state.engine.clone();
    let app = kgp_ingest::build_router(state).layer(TraceLayer::new_for_http());

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the TOML level applies to this crate
fn init_tracing(config: &TomlConfig) {
    let fallback = if config.logging.level == "info" {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        format!("kgp_ingest={},tower_http=info", config.logging.level)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
