//! # mailbatch_core
//!
//! Bulk email validation: an ordered chain of validation stages applied to every
//! address of a tabular batch, with optional live progress for one subscriber
//! per session.
//!
//! ## Features
//!
//! - **Short-circuiting validation chain**: format, typo, disposable, MX, SMTP
//! - **Contained failures**: a stage that cannot reach a verdict yields an
//!   `<stage>:error:<message>` verdict instead of aborting the batch
//! - **Session-scoped progress** through an injectable [`ProgressBroadcaster`]
//! - **Ordered results** even when rows are validated concurrently
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mailbatch_core::{
//!     BatchOptions, BatchOrchestrator, BatchRequest, DiscardRowSink, InputRow,
//!     MemoryRowSource, SessionRegistry, ValidationChain, ValidationConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let chain = ValidationChain::from_config(&ValidationConfig::default()).await?;
//!     let orchestrator = BatchOrchestrator::new(
//!         Arc::new(chain),
//!         Arc::new(SessionRegistry::new()),
//!         BatchOptions::default(),
//!     );
//!
//!     let rows: Vec<InputRow> = vec![serde_json::from_str(r#"{"email": "someone@example.com"}"#)?];
//!     let report = orchestrator
//!         .run(BatchRequest::new("probe@example.org"), MemoryRowSource::from(rows), &DiscardRowSink)
//!         .await?;
//!     println!("{} of {} deliverable", report.stats.valid, report.stats.total);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod broadcast;
pub mod chain;
pub mod disposable;
pub mod dns;
pub mod heuristics;
pub mod model;
pub mod privacy;
pub mod stages;
pub mod tabular;

use std::time::Duration;
use thiserror::Error;

/// Configuration for the validation stages
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// DNS resolver timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
    /// DNS cache size (number of entries)
    pub dns_cache_size: usize,
    /// Minimum TTL for positive DNS cache entries
    pub dns_min_ttl_secs: u64,
    /// Bloom filter false positive rate
    pub bloom_filter_fp_rate: f64,
    /// Domains flagged as disposable on top of the bundled list
    pub extra_disposable_domains: Vec<String>,
    /// Run the typo stage
    pub enable_typo_check: bool,
    /// Run the disposable-domain stage
    pub enable_disposable_check: bool,
    /// Run the MX stage
    pub enable_mx_check: bool,
    /// Run the SMTP mailbox probe
    pub enable_smtp_probe: bool,
    /// Upper bound for one MX stage execution
    pub mx_timeout_ms: u64,
    /// Upper bound for one SMTP probe, connect to QUIT
    pub smtp_timeout_ms: u64,
    /// Port dialled on the mail exchanger
    pub smtp_port: u16,
    /// Name announced in EHLO
    pub smtp_helo_name: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 500,
            dns_attempts: 2,
            dns_cache_size: 10_000,
            dns_min_ttl_secs: 60,
            bloom_filter_fp_rate: 0.0001, // 0.01%
            extra_disposable_domains: Vec::new(),
            enable_typo_check: true,
            enable_disposable_check: true,
            enable_mx_check: true,
            enable_smtp_probe: cfg!(feature = "smtp_probe"),
            mx_timeout_ms: 3_000,
            smtp_timeout_ms: 5_000,
            smtp_port: 25,
            smtp_helo_name: "localhost".to_string(),
        }
    }
}

impl ValidationConfig {
    /// Names of the stages switched off by this configuration
    pub fn disabled_stages(&self) -> Vec<String> {
        [
            (stages::TYPO, self.enable_typo_check),
            (stages::DISPOSABLE, self.enable_disposable_check),
            (stages::MX, self.enable_mx_check),
            (stages::SMTP, self.enable_smtp_probe),
        ]
        .into_iter()
        .filter(|(_, enabled)| !enabled)
        .map(|(name, _)| name.to_string())
        .collect()
    }

    pub fn mx_timeout(&self) -> Duration {
        Duration::from_millis(self.mx_timeout_ms)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_millis(self.smtp_timeout_ms)
    }
}

/// Errors surfaced to the caller of a batch run or a session operation.
///
/// Per-address problems never show up here; they are recorded as failing
/// verdicts on the row instead.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Session '{0}' already has a live subscriber")]
    DuplicateSession(String),
    #[error("Batch I/O failure: {0}")]
    BatchIo(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;

// Re-export main types
pub use batch::{BatchOptions, BatchOrchestrator, BatchReport, BatchRequest};
pub use broadcast::{ProgressBroadcaster, SessionRegistry, Subscription};
pub use chain::{ChainOutcome, PipelineStats, ValidationChain};
pub use model::{BatchStats, InputRow, ProgressEvent, RowResult, StageVerdict};
pub use stages::{StageContext, StageError, ValidatorStage};
pub use tabular::{CsvRowSink, CsvRowSource, DiscardRowSink, MemoryRowSource, RowSink, RowSource};
pub use ValidationConfig as Config;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_enables_every_stage() {
        let config = ValidationConfig {
            enable_smtp_probe: true,
            ..ValidationConfig::default()
        };
        assert!(config.disabled_stages().is_empty());
    }

    #[test]
    fn test_disabled_stages_follow_toggles() {
        let config = ValidationConfig {
            enable_mx_check: false,
            enable_smtp_probe: false,
            ..ValidationConfig::default()
        };
        assert_eq!(config.disabled_stages(), vec!["mx".to_string(), "smtp".to_string()]);
    }

    #[test]
    fn test_timeouts() {
        let config = ValidationConfig::default();
        assert_eq!(config.mx_timeout(), Duration::from_secs(3));
        assert_eq!(config.smtp_timeout(), Duration::from_secs(5));
    }
}
