//! Validator stages and the contract they share
//!
//! Every stage answers one question about one address. Stages are ordered
//! cheapest first by [`crate::chain::ValidationChain`]; later stages assume the
//! earlier ones passed.

mod disposable;
mod format;
mod mx;
#[cfg(feature = "smtp_probe")]
mod smtp;
mod typo;

pub use disposable::DisposableStage;
pub use format::{is_valid_domain_format, FormatStage};
pub use mx::MxStage;
#[cfg(feature = "smtp_probe")]
pub use smtp::{SmtpProbeSettings, SmtpStage};
pub use typo::TypoStage;

use crate::model::StageVerdict;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

pub const FORMAT: &str = "format";
pub const TYPO: &str = "typo";
pub const DISPOSABLE: &str = "disposable";
pub const MX: &str = "mx";
pub const SMTP: &str = "smtp";

/// A stage could not determine a verdict.
///
/// The chain turns this into a failing `<stage>:error:<message>` verdict.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("dns lookup failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),
    #[error("smtp dialogue failed: {0}")]
    Smtp(String),
    #[error("stage panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Per-run inputs shared by every stage invocation
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Reference address used as `MAIL FROM` by probing stages
    pub sender: String,
    disabled: HashSet<String>,
}

impl StageContext {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            disabled: HashSet::new(),
        }
    }

    pub fn with_disabled<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.disabled
            .extend(stages.into_iter().map(|stage| stage.as_ref().trim().to_lowercase()));
        self
    }

    pub fn is_enabled(&self, stage: &str) -> bool {
        !self.disabled.contains(stage)
    }
}

/// One check in the validation chain
#[async_trait]
pub trait ValidatorStage: Send + Sync {
    /// Stable identifier, also used as the failure reason
    fn name(&self) -> &'static str;

    /// Upper bound the chain enforces on [`ValidatorStage::check`]
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Judge one address. `Err` means no verdict could be reached.
    async fn check(&self, address: &str, ctx: &StageContext) -> Result<StageVerdict, StageError>;
}

/// Split an address into local part and lowercased domain at the last `@`
pub fn split_address(address: &str) -> Option<(&str, String)> {
    let at = address.rfind('@')?;
    let (local, domain) = (&address[..at], &address[at + 1..]);
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain.trim_end_matches('.').to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("Ada@Example.COM"), Some(("Ada", "example.com".to_string())));
        assert_eq!(
            split_address("\"a@b\"@example.com"),
            Some(("\"a@b\"", "example.com".to_string()))
        );
        assert_eq!(split_address("no-at-sign"), None);
        assert_eq!(split_address("@example.com"), None);
        assert_eq!(split_address("user@"), None);
    }

    #[test]
    fn test_context_disabled_stages() {
        let ctx = StageContext::new("probe@example.org").with_disabled(["SMTP", " mx "]);
        assert!(ctx.is_enabled(FORMAT));
        assert!(!ctx.is_enabled(MX));
        assert!(!ctx.is_enabled(SMTP));
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "timed out after 5000ms");
        assert_eq!(
            StageVerdict::execution_failure(SMTP, &err).reason.as_deref(),
            Some("smtp:error:timed out after 5000ms")
        );
    }
}
