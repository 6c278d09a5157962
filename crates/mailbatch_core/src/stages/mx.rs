use super::{split_address, StageContext, StageError, ValidatorStage, MX};
use crate::dns::DnsResolver;
use crate::model::StageVerdict;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Requires at least one mail exchanger for the address's domain
pub struct MxStage {
    resolver: Arc<DnsResolver>,
    timeout: Duration,
}

impl MxStage {
    pub fn new(resolver: Arc<DnsResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }
}

#[async_trait]
impl ValidatorStage for MxStage {
    fn name(&self) -> &'static str {
        MX
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn check(&self, address: &str, _ctx: &StageContext) -> Result<StageVerdict, StageError> {
        let Some((_, domain)) = split_address(address) else {
            return Err(anyhow::anyhow!("address has no domain part").into());
        };

        let hosts = self.resolver.mx_hosts(&domain).await?;
        if hosts.is_empty() {
            return Ok(StageVerdict::fail(MX));
        }

        debug!("Domain {} accepts mail via {}", domain, hosts[0].exchange);
        Ok(StageVerdict::pass())
    }
}
