//! Health check and monitoring routes
//!
//! This module contains endpoints for service health checks, readiness probes,
//! and monitoring metrics.

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use mailbatch_core::{stages, PipelineStats, StageContext};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint - GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: String,
}

/// Readiness check endpoint - GET /ready
///
/// Runs the local format stage over a canned address; no network involved.
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let chain = state.orchestrator.chain();
    let local_only = StageContext::default().with_disabled(
        chain
            .stage_names()
            .into_iter()
            .filter(|name| *name != stages::FORMAT),
    );

    let outcome = chain.validate("readiness@example.com", &local_only).await;
    let ready = outcome.valid && outcome.stage_verdicts.contains_key(stages::FORMAT);
    if !ready {
        warn!("Readiness check failed: {:?}", outcome.reason);
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}

/// Metrics endpoint - GET /metrics
///
/// Returns Prometheus-compatible metrics for monitoring.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    let stats = state.orchestrator.chain().stats();

    let metrics = format!(
        "# HELP mailbatch_disposable_domains_total Total number of disposable domains in filter\n\
         # TYPE mailbatch_disposable_domains_total gauge\n\
         mailbatch_disposable_domains_total {}\n\
         \n\
         # HELP mailbatch_filter_memory_bytes Memory usage of disposable domain filter\n\
         # TYPE mailbatch_filter_memory_bytes gauge\n\
         mailbatch_filter_memory_bytes {}\n\
         \n\
         # HELP mailbatch_typo_providers_total Total number of typo detection providers\n\
         # TYPE mailbatch_typo_providers_total gauge\n\
         mailbatch_typo_providers_total {}\n\
         \n\
         # HELP mailbatch_progress_sessions Progress sessions with a live subscriber\n\
         # TYPE mailbatch_progress_sessions gauge\n\
         mailbatch_progress_sessions {}\n\
         \n\
         # HELP mailbatch_build_info Build information\n\
         # TYPE mailbatch_build_info gauge\n\
         mailbatch_build_info{{version=\"{}\"}} 1\n",
        stats.disposable_domains_count,
        stats.disposable_filter_memory_bytes,
        stats.typo_providers_count,
        state.broadcaster.active_sessions(),
        env!("CARGO_PKG_VERSION")
    );

    (StatusCode::OK, metrics)
}

/// Statistics response
#[derive(Serialize)]
pub struct StatsResponse {
    pub version: String,
    pub pipeline_stats: PipelineStats,
    pub active_sessions: usize,
    pub timestamp: String,
}

/// Statistics endpoint - GET /admin/stats
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline_stats: state.orchestrator.chain().stats(),
        active_sessions: state.broadcaster.active_sessions(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Cache response
#[derive(Serialize)]
pub struct CacheResponse {
    pub message: String,
    pub timestamp: String,
}

/// Cache clearing endpoint - POST /admin/cache/clear
pub async fn clear_cache_handler(State(state): State<Arc<AppState>>) -> Json<CacheResponse> {
    let message = if state.orchestrator.chain().clear_dns_cache() {
        info!("DNS cache cleared by admin request");
        "DNS cache cleared successfully"
    } else {
        "No DNS cache in use"
    };

    Json(CacheResponse {
        message: message.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
