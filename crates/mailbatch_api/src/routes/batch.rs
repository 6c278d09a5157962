//! Batch validation routes

use crate::{api_handler::*, config::BatchConfig, AppState};
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Json,
};
use mailbatch_core::{BatchReport, BatchRequest, CsvRowSource, MemoryRowSource, RowSource};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// POST /v1/batch
///
/// Validates every posted row and answers once the whole batch is done. When
/// `sessionId` is set, progress is streamed to that session meanwhile.
#[instrument(skip_all, fields(rows = body.rows.len(), session_id = body.session_id.as_deref()))]
pub async fn run_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchRequestBody>,
) -> ApiResult<BatchResponse> {
    let request = build_request(
        &state.config.batch,
        body.sender,
        body.email_column,
        body.session_id,
        body.disabled_stages,
    )?;
    let report = execute(&state, request, MemoryRowSource::from(body.rows)).await?;
    Ok(Json(report.into()))
}

/// POST /v1/batch/csv
///
/// Same as `/v1/batch`, with the rows sent as a CSV document whose first line
/// holds the column names. Run parameters travel in the query string.
#[instrument(skip_all, fields(bytes = body.len(), session_id = query.session_id.as_deref()))]
pub async fn run_csv_batch_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CsvBatchQuery>,
    body: Bytes,
) -> ApiResult<BatchResponse> {
    let source = CsvRowSource::from_reader(body.as_ref())
        .map_err(|e| ApiError::InvalidRequest(format!("Unreadable CSV: {}", e)))?;

    let disabled_stages = query
        .disabled_stages
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|stage| !stage.is_empty())
        .map(str::to_string)
        .collect();
    let request = build_request(
        &state.config.batch,
        query.sender,
        query.email_column,
        query.session_id,
        disabled_stages,
    )?;

    let report = execute(&state, request, source).await?;
    Ok(Json(report.into()))
}

fn build_request(
    batch_config: &BatchConfig,
    sender: Option<String>,
    email_column: Option<String>,
    session_id: Option<String>,
    disabled_stages: Vec<String>,
) -> Result<BatchRequest, ApiError> {
    let sender = sender
        .or_else(|| batch_config.default_sender.clone())
        .map(|sender| sender.trim().to_string())
        .filter(|sender| !sender.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("A sender address is required".to_string()))?;

    let mut request = BatchRequest::new(sender)
        .with_email_column(email_column.unwrap_or_else(|| batch_config.default_email_column.clone()));
    if let Some(session_id) = session_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()) {
        request = request.with_session(session_id);
    }
    for stage in disabled_stages {
        request = request.disable_stage(stage);
    }
    Ok(request)
}

/// Run the batch on its own task so a client hanging up cannot cut it short
async fn execute<S>(state: &AppState, request: BatchRequest, source: S) -> Result<BatchReport, ApiError>
where
    S: RowSource + 'static,
{
    let max_rows = state.config.batch.max_rows;
    if source.total() > max_rows {
        warn!("Batch too large: {} rows", source.total());
        return Err(ApiError::InvalidRequest(format!(
            "Batch has {} rows, the limit is {}",
            source.total(),
            max_rows
        )));
    }

    let report = state
        .orchestrator
        .spawn(request, source, Arc::clone(&state.sink))
        .await
        .map_err(|e| {
            error!("Batch task failed: {}", e);
            ApiError::InternalError(format!("Batch task failed: {}", e))
        })??;

    info!(
        "Batch {} finished: {}/{} valid",
        report.batch_id, report.stats.valid, report.stats.total
    );
    Ok(report)
}
