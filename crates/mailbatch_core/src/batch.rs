//! Batch orchestration: rows in, verdicts and progress events out

use crate::{
    broadcast::ProgressBroadcaster,
    chain::ValidationChain,
    model::{extract_address, BatchStats, InputRow, ProgressEvent, RowResult},
    privacy::AddressRedactor,
    stages::{StageContext, FORMAT},
    tabular::{RowSink, RowSource},
    BatchError,
};
use futures::StreamExt;
use indexmap::IndexMap;
use std::io;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, Instrument, Span};
use uuid::Uuid;

/// Orchestrator tuning shared by every run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Rows validated at the same time; results are still consumed in order
    pub row_concurrency: usize,
    /// Longest wait for a late subscriber before the first event
    pub subscriber_grace: Duration,
    /// Stages switched off for every run
    pub disabled_stages: Vec<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            row_concurrency: 8,
            subscriber_grace: Duration::from_millis(300),
            disabled_stages: Vec::new(),
        }
    }
}

/// Per-run parameters
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub email_column: String,
    /// `MAIL FROM` for the SMTP probe
    pub sender: String,
    pub session_id: Option<String>,
    /// Stages switched off for this run only
    pub disabled_stages: Vec<String>,
}

impl BatchRequest {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            email_column: "email".to_string(),
            sender: sender.into(),
            session_id: None,
            disabled_stages: Vec::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_email_column(mut self, column: impl Into<String>) -> Self {
        self.email_column = column.into();
        self
    }

    pub fn disable_stage(mut self, stage: impl Into<String>) -> Self {
        self.disabled_stages.push(stage.into());
        self
    }
}

/// Everything a finished run hands back to its caller
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub stats: BatchStats,
    /// One result per input row, in input order
    pub rows: Vec<RowResult>,
    pub output_ref: Option<String>,
}

/// Drives the validation chain over a row source and reports progress
pub struct BatchOrchestrator {
    chain: Arc<ValidationChain>,
    broadcaster: Arc<dyn ProgressBroadcaster>,
    options: BatchOptions,
    redactor: AddressRedactor,
}

impl BatchOrchestrator {
    pub fn new(
        chain: Arc<ValidationChain>,
        broadcaster: Arc<dyn ProgressBroadcaster>,
        options: BatchOptions,
    ) -> Self {
        info!(
            "Batch orchestrator ready: {} row(s) in flight, {}ms subscriber grace",
            options.row_concurrency,
            options.subscriber_grace.as_millis()
        );
        Self {
            chain,
            broadcaster,
            options,
            redactor: AddressRedactor::with_random_salt(),
        }
    }

    pub fn chain(&self) -> &Arc<ValidationChain> {
        &self.chain
    }

    pub fn broadcaster(&self) -> &Arc<dyn ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Start [`run`](Self::run) on its own task.
    ///
    /// Dropping the handle detaches the run instead of cancelling it, so the
    /// session still gets its terminal event and the sink still gets the rows.
    pub fn spawn<S, K>(
        self: &Arc<Self>,
        request: BatchRequest,
        source: S,
        sink: Arc<K>,
    ) -> JoinHandle<Result<BatchReport, BatchError>>
    where
        S: RowSource + 'static,
        K: RowSink + ?Sized + 'static,
    {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(request, source, sink.as_ref()).await }.in_current_span())
    }

    /// Validate every row of `source` and persist the results through `sink`.
    ///
    /// Per-row problems end up in the rows. The only error is
    /// [`BatchError::BatchIo`], raised when the source or the sink fails; an
    /// attached session then receives an `error` event, which ends it.
    #[instrument(
        name = "batch",
        skip_all,
        fields(batch_id = tracing::field::Empty, session_id = request.session_id.as_deref())
    )]
    pub async fn run<S, K>(&self, request: BatchRequest, source: S, sink: &K) -> Result<BatchReport, BatchError>
    where
        S: RowSource,
        K: RowSink + ?Sized,
    {
        let batch_id = Uuid::new_v4();
        Span::current().record("batch_id", tracing::field::display(batch_id));

        let progress = SessionProgress {
            broadcaster: self.broadcaster.as_ref(),
            session_id: request.session_id.as_deref(),
        };
        progress.await_subscriber(self.options.subscriber_grace).await;

        match self.process(batch_id, &request, source, sink, &progress).await {
            Ok(report) => {
                progress.publish(ProgressEvent::Complete {
                    stats: report.stats,
                    output_ref: report.output_ref.clone(),
                });
                info!(
                    total = report.stats.total,
                    valid = report.stats.valid,
                    invalid = report.stats.invalid,
                    "Batch complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!("Batch aborted: {}", e);
                progress.publish(ProgressEvent::Error {
                    message: e.to_string(),
                });
                Err(BatchError::BatchIo(e))
            }
        }
    }

    async fn process<S, K>(
        &self,
        batch_id: Uuid,
        request: &BatchRequest,
        mut source: S,
        sink: &K,
        progress: &SessionProgress<'_>,
    ) -> io::Result<BatchReport>
    where
        S: RowSource,
        K: RowSink + ?Sized,
    {
        let total = source.total();
        if total == 0 {
            debug!("Row source is empty");
            return Ok(BatchReport {
                batch_id,
                stats: BatchStats::default(),
                rows: Vec::new(),
                output_ref: None,
            });
        }

        progress.publish(ProgressEvent::Start { total });

        let ctx = StageContext::new(request.sender.as_str())
            .with_disabled(self.options.disabled_stages.iter().chain(&request.disabled_stages));
        let ctx = &ctx;
        let chain = self.chain.as_ref();
        let column = request.email_column.as_str();

        let mut results = pin!(futures::stream::iter(std::iter::from_fn(move || source.next_row()))
            .map(move |row| async move { Ok::<_, io::Error>(validate_row(chain, row?, column, ctx).await) })
            .buffered(self.options.row_concurrency.max(1)));

        let mut rows = Vec::with_capacity(total);
        let mut stats = BatchStats::default();
        while let Some(result) = results.next().await {
            let row = result?;
            debug!(
                row = rows.len(),
                address = %self.redactor.redact(&row.email),
                valid = row.valid,
                reason = row.reason.as_deref(),
                "Row validated"
            );
            stats.record(row.valid);
            progress.publish(ProgressEvent::from(&row));
            rows.push(row);
        }

        let output_ref = sink.write(batch_id, &rows).await?;

        Ok(BatchReport {
            batch_id,
            stats,
            rows,
            output_ref,
        })
    }
}

async fn validate_row(chain: &ValidationChain, fields: InputRow, column: &str, ctx: &StageContext) -> RowResult {
    let Some(email) = extract_address(&fields, column) else {
        return RowResult {
            fields,
            email: String::new(),
            valid: false,
            reason: Some(FORMAT.to_string()),
            stage_verdicts: IndexMap::new(),
        };
    };

    let outcome = chain.validate(&email, ctx).await;
    RowResult {
        fields,
        email,
        valid: outcome.valid,
        reason: outcome.reason,
        stage_verdicts: outcome.stage_verdicts,
    }
}

/// Publishing side of the optional session attached to a run
struct SessionProgress<'a> {
    broadcaster: &'a dyn ProgressBroadcaster,
    session_id: Option<&'a str>,
}

impl SessionProgress<'_> {
    async fn await_subscriber(&self, grace: Duration) {
        let Some(session_id) = self.session_id else {
            return;
        };
        if self.broadcaster.wait_for_subscriber(session_id, grace).await {
            debug!("Subscriber attached");
        } else {
            debug!("No subscriber after {}ms, progress events may be lost", grace.as_millis());
        }
    }

    fn publish(&self, event: ProgressEvent) {
        if let Some(session_id) = self.session_id {
            self.broadcaster.publish(session_id, event);
        }
    }
}
