//! divelog-ai - Dive Metric Extraction Microservice
//!
//! Reads dive computer screens and logbook pages through a vision engine and
//! serves validated dive metrics over HTTP REST + SSE.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use divelog_common::config::{
    config_file_path, load_toml_config_or_default, LoggingConfig, RootFolderInitializer,
    RootFolderResolver,
};
use divelog_common::events::EventBus;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use divelog_ai::config::{resolve_vision_api_key, ServiceConfig};
use divelog_ai::extractors::OpenAiVisionEngine;
use divelog_ai::workflow::DiveMetricPipeline;
use divelog_ai::AppState;

const MODULE_NAME: &str = "divelog-ai";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "divelog-ai")]
#[command(about = "Dive metric extraction microservice", long_about = None)]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "5740", env = "DIVELOG_AI_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "DIVELOG_AI_BIND")]
    bind: std::net::IpAddr,

    /// Root folder holding the database (overrides DIVELOG_ROOT_FOLDER and TOML)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config_dir>/divelog/divelog-ai.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Store the vision API key in the database
    SetVisionKey {
        /// API key for the vision backend
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| config_file_path(MODULE_NAME));
    let toml_config = load_toml_config_or_default(config_path.as_deref());
    init_logging(&toml_config.logging)?;

    info!("Starting divelog-ai (Dive Metric Extraction) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    // Root folder: CLI → ENV → TOML → OS default
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_config(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = divelog_ai::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    if let Some(Command::SetVisionKey { key }) = &args.command {
        divelog_ai::db::settings::set_vision_api_key(&db_pool, key.clone())
            .await
            .context("Failed to store vision API key")?;
        info!("Vision API key stored in database");
        return Ok(());
    }

    let service_config = ServiceConfig::from_toml(&toml_config);
    info!(
        model = %service_config.vision.model,
        workers = service_config.batch.workers,
        requests_per_second = service_config.vision.requests_per_second,
        "Service configuration resolved"
    );

    let event_bus = EventBus::new(100);
    let mut state = AppState::new(db_pool.clone(), event_bus)
        .with_batch_settings(service_config.batch.clone());

    match resolve_vision_api_key(&db_pool, &toml_config).await {
        Ok(api_key) => {
            let engine = OpenAiVisionEngine::new(api_key, &service_config.vision)
                .context("Failed to create vision engine")?;
            info!(endpoint = %engine.endpoint(), "Vision engine initialized");
            let pipeline = DiveMetricPipeline::from_engine(Arc::new(engine), &service_config);
            state = state.with_pipeline(Arc::new(pipeline));
        }
        Err(e) => {
            warn!("{}", e);
            warn!("Analysis endpoints will answer 503 until a vision API key is configured");
        }
    }

    let app = divelog_ai::build_router(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Tracing setup: `RUST_LOG` wins over the TOML level
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("divelog_ai={0},divelog_common={0},tower_http=info", logging.level).into());

    match &logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
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
