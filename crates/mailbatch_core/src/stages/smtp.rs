use super::{split_address, StageContext, StageError, ValidatorStage, SMTP};
use crate::dns::DnsResolver;
use crate::model::StageVerdict;
use async_trait::async_trait;
use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::commands::{Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the mailbox probe
#[derive(Debug, Clone)]
pub struct SmtpProbeSettings {
    pub port: u16,
    pub helo_name: String,
    pub timeout: Duration,
}

impl Default for SmtpProbeSettings {
    fn default() -> Self {
        Self {
            port: 25,
            helo_name: "localhost".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Asks the preferred mail exchanger whether it accepts the mailbox.
///
/// Runs `EHLO`, `MAIL FROM`, `RCPT TO` and `QUIT` without sending any data.
/// A permanent rejection of `RCPT` fails the address; anything that prevents
/// an answer is an execution failure.
pub struct SmtpStage {
    resolver: Arc<DnsResolver>,
    settings: SmtpProbeSettings,
}

impl SmtpStage {
    pub fn new(resolver: Arc<DnsResolver>, settings: SmtpProbeSettings) -> Self {
        Self { resolver, settings }
    }
}

#[async_trait]
impl ValidatorStage for SmtpStage {
    fn name(&self) -> &'static str {
        SMTP
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.settings.timeout)
    }

    async fn check(&self, address: &str, ctx: &StageContext) -> Result<StageVerdict, StageError> {
        let Some((_, domain)) = split_address(address) else {
            return Err(anyhow::anyhow!("address has no domain part").into());
        };

        let hosts = self.resolver.mx_hosts(&domain).await?;
        let Some(host) = hosts.into_iter().next() else {
            return Ok(StageVerdict::fail(SMTP));
        };

        let sender: Address = ctx
            .sender
            .parse()
            .map_err(|e| StageError::Smtp(format!("invalid sender address: {e}")))?;
        let recipient: Address = address
            .parse()
            .map_err(|e| StageError::Smtp(format!("address not usable as recipient: {e}")))?;

        debug!("Probing mailbox at {}:{}", host.exchange, self.settings.port);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || probe_mailbox(&host.exchange, &settings, sender, recipient))
            .await
            .map_err(|e| StageError::Panicked(e.to_string()))?
    }
}

fn probe_mailbox(
    host: &str,
    settings: &SmtpProbeSettings,
    sender: Address,
    recipient: Address,
) -> Result<StageVerdict, StageError> {
    let hello = ClientId::Domain(settings.helo_name.clone());
    let mut connection = SmtpConnection::connect(
        (host, settings.port),
        Some(settings.timeout),
        &hello,
        None,
        None,
    )
    .map_err(|e| StageError::Smtp(format!("connect to {host}: {e}")))?;

    if let Err(e) = connection.command(Mail::new(Some(sender), vec![])) {
        let _ = connection.quit();
        return Err(StageError::Smtp(format!("sender rejected: {e}")));
    }

    let verdict = match connection.command(Rcpt::new(recipient, vec![])) {
        Ok(_) => StageVerdict::pass(),
        Err(e) if e.is_permanent() => {
            debug!("Mailbox rejected by {}: {}", host, e);
            StageVerdict::fail(SMTP)
        }
        Err(e) => {
            let _ = connection.quit();
            return Err(StageError::Smtp(e.to_string()));
        }
    };

    let _ = connection.quit();
    Ok(verdict)
}
