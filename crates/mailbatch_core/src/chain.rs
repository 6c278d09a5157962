//! Validation chain running the stages in order for one address
//!
//! Stages run cheapest first and the chain stops at the first failing verdict,
//! so network probes only ever see addresses that survived the local checks.

use crate::{
    disposable::DisposableDetector,
    dns::DnsResolver,
    heuristics::TypoDetector,
    model::StageVerdict,
    privacy::AddressRedactor,
    stages::{
        DisposableStage, FormatStage, MxStage, StageContext, StageError, TypoStage,
        ValidatorStage,
    },
    BatchError, ValidationConfig,
};

#[cfg(feature = "smtp_probe")]
use crate::stages::{SmtpProbeSettings, SmtpStage};

use anyhow::Context;
use futures::FutureExt;
use indexmap::IndexMap;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verdict of the whole chain for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub valid: bool,
    /// Reason of the first failing stage
    pub reason: Option<String>,
    /// Stages that executed, in order
    pub stage_verdicts: IndexMap<String, StageVerdict>,
}

/// Ordered list of validator stages
pub struct ValidationChain {
    stages: Vec<Arc<dyn ValidatorStage>>,
    stats: PipelineStats,
    resolver: Option<Arc<DnsResolver>>,
    redactor: AddressRedactor,
}

impl ValidationChain {
    /// Chain over arbitrary stages, run in the given order
    pub fn new(stages: Vec<Arc<dyn ValidatorStage>>) -> Self {
        let stats = PipelineStats {
            stages: stages.iter().map(|stage| stage.name().to_string()).collect(),
            ..PipelineStats::default()
        };

        Self {
            stages,
            stats,
            resolver: None,
            redactor: AddressRedactor::with_random_salt(),
        }
    }

    /// Standard chain: format, typo, disposable, mx, smtp
    ///
    /// Every stage is built even if the configuration disables it; toggles are
    /// applied per run through [`StageContext`].
    pub async fn from_config(config: &ValidationConfig) -> Result<Self, BatchError> {
        info!("Initializing validation chain");

        if !(config.bloom_filter_fp_rate > 0.0 && config.bloom_filter_fp_rate < 1.0) {
            return Err(BatchError::ConfigurationError(format!(
                "bloom_filter_fp_rate must be between 0 and 1, got {}",
                config.bloom_filter_fp_rate
            )));
        }

        let disposable_detector = DisposableDetector::bundled(
            &config.extra_disposable_domains,
            config.bloom_filter_fp_rate,
        )
        .context("Failed to initialize disposable detector")?;

        let resolver = Arc::new(
            DnsResolver::new(
                config.dns_timeout_ms,
                config.dns_attempts,
                config.dns_cache_size,
                config.dns_min_ttl_secs,
            )
            .context("Failed to initialize DNS resolver")?,
        );

        let typo_detector = TypoDetector::new();

        let stats = PipelineStats {
            stages: Vec::new(),
            disposable_domains_count: disposable_detector.domain_count(),
            disposable_filter_memory_bytes: disposable_detector.memory_usage(),
            typo_providers_count: typo_detector.provider_count(),
            typo_tlds_count: typo_detector.tld_count(),
        };

        #[allow(unused_mut)]
        let mut stages: Vec<Arc<dyn ValidatorStage>> = vec![
            Arc::new(FormatStage),
            Arc::new(TypoStage::new(typo_detector)),
            Arc::new(DisposableStage::new(disposable_detector)),
            Arc::new(MxStage::new(Arc::clone(&resolver), config.mx_timeout())),
        ];

        #[cfg(feature = "smtp_probe")]
        stages.push(Arc::new(SmtpStage::new(
            Arc::clone(&resolver),
            SmtpProbeSettings {
                port: config.smtp_port,
                helo_name: config.smtp_helo_name.clone(),
                timeout: config.smtp_timeout(),
            },
        )));

        let mut chain = Self::new(stages);
        chain.stats = PipelineStats {
            stages: chain.stats.stages,
            ..stats
        };
        chain.resolver = Some(resolver);

        info!("Validation chain initialized: {}", chain.stats.stages.join(" -> "));
        Ok(chain)
    }

    /// Run the enabled stages over one address, stopping at the first failure
    pub async fn validate(&self, address: &str, ctx: &StageContext) -> ChainOutcome {
        let mut stage_verdicts = IndexMap::new();

        for stage in &self.stages {
            let name = stage.name();
            if !ctx.is_enabled(name) {
                continue;
            }

            let verdict = self.run_stage(stage.as_ref(), address, ctx).await;
            let failure = (!verdict.valid).then(|| verdict.reason.clone().unwrap_or_else(|| name.to_string()));
            stage_verdicts.insert(name.to_string(), verdict);

            if let Some(reason) = failure {
                debug!(address = %self.redactor.redact(address), stage = name, "Address rejected");
                return ChainOutcome {
                    valid: false,
                    reason: Some(reason),
                    stage_verdicts,
                };
            }
        }

        debug!(address = %self.redactor.redact(address), "Address passed every enabled stage");
        ChainOutcome {
            valid: true,
            reason: None,
            stage_verdicts,
        }
    }

    /// Execute one stage, folding errors, timeouts and panics into a verdict
    async fn run_stage(&self, stage: &dyn ValidatorStage, address: &str, ctx: &StageContext) -> StageVerdict {
        let name = stage.name();
        let guarded = AssertUnwindSafe(stage.check(address, ctx)).catch_unwind();

        let outcome = match stage.timeout() {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(StageError::Timeout(limit))),
            },
            None => guarded.await,
        };

        let error = match outcome {
            Ok(Ok(mut verdict)) => {
                if !verdict.valid && verdict.reason.is_none() {
                    verdict.reason = Some(name.to_string());
                }
                return verdict;
            }
            Ok(Err(error)) => error,
            Err(panic) => StageError::Panicked(panic_message(panic.as_ref())),
        };

        warn!(
            address = %self.redactor.redact(address),
            stage = name,
            error = %error,
            "Stage could not reach a verdict"
        );
        StageVerdict::execution_failure(name, &error)
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Get pipeline statistics for monitoring
    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Clear the shared DNS cache, if this chain owns a resolver
    pub fn clear_dns_cache(&self) -> bool {
        match &self.resolver {
            Some(resolver) => {
                resolver.clear_cache();
                true
            }
            None => false,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Statistics about the validation chain
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub stages: Vec<String>,
    pub disposable_domains_count: usize,
    pub disposable_filter_memory_bytes: usize,
    pub typo_providers_count: usize,
    pub typo_tlds_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{DISPOSABLE, FORMAT, MX, SMTP, TYPO};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Stage with a canned behaviour and an invocation counter
    struct ScriptedStage {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    enum Behaviour {
        Pass,
        Fail,
        FailWithoutReason,
        Error,
        Hang,
        Panic,
    }

    impl ScriptedStage {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ValidatorStage for ScriptedStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }

        async fn check(&self, _address: &str, _ctx: &StageContext) -> Result<StageVerdict, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Pass => Ok(StageVerdict::pass()),
                Behaviour::Fail => Ok(StageVerdict::fail(self.name)),
                Behaviour::FailWithoutReason => Ok(StageVerdict {
                    valid: false,
                    reason: None,
                    suggestion: None,
                }),
                Behaviour::Error => Err(StageError::Smtp("connection refused".to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(StageVerdict::pass())
                }
                Behaviour::Panic => panic!("resolver exploded"),
            }
        }
    }

    fn chain_of(stages: &[Arc<ScriptedStage>]) -> ValidationChain {
        ValidationChain::new(
            stages
                .iter()
                .map(|stage| Arc::clone(stage) as Arc<dyn ValidatorStage>)
                .collect(),
        )
    }

    fn all_passing() -> Vec<Arc<ScriptedStage>> {
        [FORMAT, TYPO, DISPOSABLE, MX, SMTP]
            .into_iter()
            .map(|name| ScriptedStage::new(name, Behaviour::Pass))
            .collect()
    }

    #[tokio::test]
    async fn test_all_passing_is_valid_without_reason() {
        let stages = all_passing();
        let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

        assert!(outcome.valid);
        assert_eq!(outcome.reason, None);
        assert_eq!(
            outcome.stage_verdicts.keys().collect::<Vec<_>>(),
            vec!["format", "typo", "disposable", "mx", "smtp"]
        );
    }

    #[tokio::test]
    async fn test_failure_at_each_position_short_circuits() {
        let names = [FORMAT, TYPO, DISPOSABLE, MX, SMTP];
        for k in 0..names.len() {
            let stages: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let behaviour = if i == k { Behaviour::Fail } else { Behaviour::Pass };
                    ScriptedStage::new(name, behaviour)
                })
                .collect();

            let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

            assert!(!outcome.valid);
            assert_eq!(outcome.reason.as_deref(), Some(names[k]));
            assert_eq!(
                outcome.stage_verdicts.keys().map(String::as_str).collect::<Vec<_>>(),
                names[..=k].to_vec()
            );
            for later in &stages[k + 1..] {
                assert_eq!(later.calls.load(Ordering::SeqCst), 0, "{} ran", later.name);
            }
        }
    }

    #[tokio::test]
    async fn test_disabled_stage_is_skipped() {
        let stages = vec![
            ScriptedStage::new(FORMAT, Behaviour::Pass),
            ScriptedStage::new(MX, Behaviour::Fail),
            ScriptedStage::new(SMTP, Behaviour::Pass),
        ];
        let ctx = StageContext::new("probe@example.org").with_disabled([MX]);

        let outcome = chain_of(&stages).validate("a@good.com", &ctx).await;

        assert!(outcome.valid);
        assert!(!outcome.stage_verdicts.contains_key(MX));
        assert_eq!(stages[1].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stage_error_becomes_error_verdict() {
        let stages = vec![
            ScriptedStage::new(FORMAT, Behaviour::Pass),
            ScriptedStage::new(SMTP, Behaviour::Error),
        ];

        let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

        assert!(!outcome.valid);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("smtp:error:smtp dialogue failed: connection refused")
        );
        assert_eq!(outcome.stage_verdicts[SMTP].reason, outcome.reason);
    }

    #[tokio::test]
    async fn test_hung_stage_times_out() {
        let stages = vec![ScriptedStage::new(MX, Behaviour::Hang)];

        let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some("mx:error:timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_panicking_stage_is_contained() {
        let stages = vec![
            ScriptedStage::new(DISPOSABLE, Behaviour::Panic),
            ScriptedStage::new(MX, Behaviour::Pass),
        ];

        let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

        assert!(!outcome.valid);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("disposable:error:stage panicked: resolver exploded")
        );
        assert_eq!(stages[1].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_without_reason_is_attributed_to_stage() {
        let stages = vec![ScriptedStage::new(TYPO, Behaviour::FailWithoutReason)];

        let outcome = chain_of(&stages).validate("a@good.com", &StageContext::default()).await;

        assert_eq!(outcome.reason.as_deref(), Some("typo"));
        assert_eq!(outcome.stage_verdicts[TYPO].reason.as_deref(), Some("typo"));
    }

    #[tokio::test]
    async fn test_from_config_builds_standard_order() {
        let chain = ValidationChain::from_config(&ValidationConfig::default()).await.unwrap();

        let mut expected = vec!["format", "typo", "disposable", "mx"];
        if cfg!(feature = "smtp_probe") {
            expected.push("smtp");
        }
        assert_eq!(chain.stage_names(), expected);

        let stats = chain.stats();
        assert!(stats.disposable_domains_count > 0);
        assert!(stats.typo_providers_count > 0);
        assert!(chain.clear_dns_cache());
    }

    #[tokio::test]
    async fn test_local_stages_of_standard_chain() {
        let chain = ValidationChain::from_config(&ValidationConfig::default()).await.unwrap();
        let ctx = StageContext::new("probe@example.org").with_disabled([MX, SMTP]);

        let outcome = chain.validate("user@mailinator.com", &ctx).await;
        assert_eq!(outcome.reason.as_deref(), Some("disposable"));

        let outcome = chain.validate("user@gmai.com", &ctx).await;
        assert_eq!(outcome.reason.as_deref(), Some("typo"));
        assert_eq!(outcome.stage_verdicts[TYPO].suggestion.as_deref(), Some("gmail.com"));

        let outcome = chain.validate("not-an-address", &ctx).await;
        assert_eq!(outcome.reason.as_deref(), Some("format"));
        assert_eq!(outcome.stage_verdicts.len(), 1);
    }
}
