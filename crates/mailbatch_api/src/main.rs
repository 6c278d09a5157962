//! Bulk Email Validation API Server
//!
//! Runs validation batches posted as JSON and streams per-address progress to
//! one Server-Sent Events subscriber per session.

use axum::{extract::DefaultBodyLimit, Router};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mailbatch_core::{
    BatchError, BatchOrchestrator, CsvRowSink, DiscardRowSink, ProgressBroadcaster, RowSink, SessionRegistry,
    ValidationChain,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api_handler;
mod config;
mod routes;

use config::*;

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub broadcaster: Arc<dyn ProgressBroadcaster>,
    pub sink: Arc<dyn RowSink>,
    pub config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = load_config()?;

    // Initialize tracing/logging
    init_tracing(&config)?;

    info!(
        "Starting {} v{}",
        config.observability.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let app_state = build_state(config.clone())
        .await
        .map_err(|e| format!("Failed to initialize validation chain: {}", e))?;

    let pipeline_stats = app_state.orchestrator.chain().stats();
    info!(
        "Chain initialized - {} disposable domains, {} KB filter, {} providers",
        pipeline_stats.disposable_domains_count,
        pipeline_stats.disposable_filter_memory_bytes / 1024,
        pipeline_stats.typo_providers_count
    );

    // Build the router
    let app = create_router(app_state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check available at http://{}/health", addr);
    info!("Batch API: http://{}/v1/batch", addr);
    info!("Progress stream: http://{}/v1/progress/<session id>", addr);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Wire the chain, the session registry, the orchestrator and the result sink
async fn build_state(config: AppConfig) -> Result<AppState, BatchError> {
    if config.batch.row_concurrency == 0 {
        return Err(BatchError::ConfigurationError(
            "batch.row_concurrency must be at least 1".to_string(),
        ));
    }

    let chain = ValidationChain::from_config(&config.validation.to_core()).await?;
    let broadcaster: Arc<dyn ProgressBroadcaster> = Arc::new(SessionRegistry::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(chain),
        Arc::clone(&broadcaster),
        config.batch.options(&config.validation),
    );

    let sink: Arc<dyn RowSink> = match &config.batch.output_dir {
        Some(dir) => {
            info!("Validated batches will be written to {}", dir);
            Arc::new(CsvRowSink::new(dir))
        }
        None => Arc::new(DiscardRowSink),
    };

    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
        broadcaster,
        sink,
        config: Arc::new(config),
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    routes::build_routes(Arc::new(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                ])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(CompressionLayer::new())
}

/// Load application configuration from environment and files
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    // Start with a base configuration using defaults
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    // Try to load config file if it exists (optional)
    if std::path::Path::new("Config.toml").exists() {
        figment = figment.merge(Toml::file("Config.toml"));
    }

    // Override with environment variables, e.g. MAILBATCH_SERVER__PORT
    figment = figment.merge(Env::prefixed("MAILBATCH_").split("__"));

    let config: AppConfig = figment.extract()?;

    Ok(config)
}

/// Initialize tracing and logging
fn init_tracing(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.observability.log_level))?;

    if config.observability.json_logs {
        // JSON format for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        // Human-readable format for development
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
