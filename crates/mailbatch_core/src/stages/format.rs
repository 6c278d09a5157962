use super::{split_address, StageContext, StageError, ValidatorStage, FORMAT};
use crate::model::StageVerdict;
use async_trait::async_trait;
use email_address::EmailAddress;
use tracing::debug;

/// Syntactic check: RFC 5322 address with a routable domain
pub struct FormatStage;

#[async_trait]
impl ValidatorStage for FormatStage {
    fn name(&self) -> &'static str {
        FORMAT
    }

    async fn check(&self, address: &str, _ctx: &StageContext) -> Result<StageVerdict, StageError> {
        if is_well_formed(address) {
            Ok(StageVerdict::pass())
        } else {
            debug!("Address failed format validation");
            Ok(StageVerdict::fail(FORMAT))
        }
    }
}

fn is_well_formed(address: &str) -> bool {
    if !EmailAddress::is_valid(address) {
        return false;
    }

    // Display names and domain literals parse above but are not mailbox addresses
    match split_address(address) {
        Some((_, domain)) => is_valid_domain_format(&domain),
        None => false,
    }
}

/// Basic domain format validation
pub fn is_valid_domain_format(domain: &str) -> bool {
    // Basic length check
    if domain.len() > 253 || domain.is_empty() {
        return false;
    }

    // Must contain at least one dot
    if !domain.contains('.') {
        return false;
    }

    // Cannot start or end with dot or hyphen
    if domain.starts_with('.') || domain.ends_with('.') ||
       domain.starts_with('-') || domain.ends_with('-') {
        return false;
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }

        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_domain_format_validation() {
        assert!(is_valid_domain_format("example.com"));
        assert!(is_valid_domain_format("sub.example.com"));
        assert!(is_valid_domain_format("test-domain.co.uk"));

        assert!(!is_valid_domain_format(""));
        assert!(!is_valid_domain_format("invalid"));
        assert!(!is_valid_domain_format(".example.com"));
        assert!(!is_valid_domain_format("example.com."));
        assert!(!is_valid_domain_format("-example.com"));
        assert!(!is_valid_domain_format("ex ample.com"));
        assert!(!is_valid_domain_format(&format!("{}.com", "a".repeat(64))));
    }

    #[tokio::test]
    async fn test_well_formed_addresses_pass() {
        let ctx = StageContext::default();
        for address in ["a@good.com", "first.last+tag@sub.example.co.uk", "x_y@t-online.de"] {
            let verdict = FormatStage.check(address, &ctx).await.unwrap();
            assert_eq!(verdict, StageVerdict::pass(), "{address}");
        }
    }

    #[tokio::test]
    async fn test_malformed_addresses_fail() {
        let ctx = StageContext::default();
        for address in [
            "bad",
            "@example.com",
            "user@",
            "user@localhost",
            "user@@example.com",
            "user@exa mple.com",
            "user@[192.168.0.1]",
            "Ada <ada@example.com>",
        ] {
            let verdict = FormatStage.check(address, &ctx).await.unwrap();
            assert_eq!(verdict, StageVerdict::fail("format"), "{address}");
        }
    }
}
