//! API Routes Module
//!
//! - `batch`: runs a batch over rows posted as JSON or CSV
//! - `progress`: live progress stream per session
//! - `health`: health checks and administrative endpoints

pub mod batch;
pub mod health;
pub mod progress;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build all API routes and return a configured Router
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/batch", post(batch::run_batch_handler))
        .route("/v1/batch/csv", post(batch::run_csv_batch_handler))
        .route(
            "/v1/progress/:session_id",
            get(progress::subscribe_handler).delete(progress::close_handler),
        )
        // Health and monitoring endpoints
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/metrics", get(health::metrics_handler))
        // Administrative endpoints
        .route("/admin/stats", get(health::stats_handler))
        .route("/admin/cache/clear", post(health::clear_cache_handler))
        .with_state(state)
}
