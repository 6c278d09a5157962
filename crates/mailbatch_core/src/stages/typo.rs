use super::{split_address, StageContext, StageError, ValidatorStage, TYPO};
use crate::heuristics::TypoDetector;
use crate::model::StageVerdict;
use async_trait::async_trait;

/// Flags domains one or two edits away from a major provider
pub struct TypoStage {
    detector: TypoDetector,
}

impl TypoStage {
    pub fn new(detector: TypoDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &TypoDetector {
        &self.detector
    }
}

#[async_trait]
impl ValidatorStage for TypoStage {
    fn name(&self) -> &'static str {
        TYPO
    }

    async fn check(&self, address: &str, _ctx: &StageContext) -> Result<StageVerdict, StageError> {
        let Some((_, domain)) = split_address(address) else {
            return Err(anyhow::anyhow!("address has no domain part").into());
        };

        Ok(match self.detector.check_typo(&domain) {
            Some(suggestion) => StageVerdict::fail(TYPO).with_suggestion(suggestion),
            None => StageVerdict::pass(),
        })
    }
}
