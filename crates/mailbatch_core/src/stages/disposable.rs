use super::{split_address, StageContext, StageError, ValidatorStage, DISPOSABLE};
use crate::disposable::DisposableDetector;
use crate::model::StageVerdict;
use async_trait::async_trait;

/// Rejects addresses hosted by throwaway-mail providers
pub struct DisposableStage {
    detector: DisposableDetector,
}

impl DisposableStage {
    pub fn new(detector: DisposableDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &DisposableDetector {
        &self.detector
    }
}

#[async_trait]
impl ValidatorStage for DisposableStage {
    fn name(&self) -> &'static str {
        DISPOSABLE
    }

    async fn check(&self, address: &str, _ctx: &StageContext) -> Result<StageVerdict, StageError> {
        let Some((_, domain)) = split_address(address) else {
            return Err(anyhow::anyhow!("address has no domain part").into());
        };

        Ok(if self.detector.is_disposable(&domain) {
            StageVerdict::fail(DISPOSABLE)
        } else {
            StageVerdict::pass()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage() -> DisposableStage {
        let detector = DisposableDetector::new(vec!["disposable.test".to_string()], 0.0001).unwrap();
        DisposableStage::new(detector)
    }

    #[tokio::test]
    async fn test_disposable_domain_fails() {
        let verdict = stage().check("user@Disposable.TEST", &StageContext::default()).await.unwrap();
        assert_eq!(verdict, StageVerdict::fail("disposable"));
    }

    #[tokio::test]
    async fn test_regular_domain_passes() {
        let verdict = stage().check("a@good.com", &StageContext::default()).await.unwrap();
        assert_eq!(verdict, StageVerdict::pass());
    }
}
