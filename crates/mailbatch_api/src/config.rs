//! Configuration management for the batch validation API
//!
//! Loaded with figment: serialized defaults, then an optional `Config.toml`,
//! then `MAILBATCH_` environment variables (`MAILBATCH_BATCH__MAX_ROWS=500`).

use mailbatch_core::BatchOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub validation: ValidationConfig,
    pub batch: BatchConfig,
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Validation chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// DNS resolver timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
    /// DNS cache size (number of entries)
    pub dns_cache_size: usize,
    /// Minimum TTL for positive DNS cache entries in seconds
    pub dns_min_ttl_secs: u64,
    /// Bloom filter false positive rate
    pub bloom_filter_fp_rate: f64,
    /// Domains treated as disposable in addition to the bundled list
    pub extra_disposable_domains: Vec<String>,
    pub enable_typo_check: bool,
    pub enable_disposable_check: bool,
    pub enable_mx_check: bool,
    /// Enable SMTP mailbox probing
    pub enable_smtp_probe: bool,
    pub mx_timeout_ms: u64,
    /// SMTP probe timeout in milliseconds
    pub smtp_timeout_ms: u64,
    pub smtp_port: u16,
    pub smtp_helo_name: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let core = mailbatch_core::ValidationConfig::default();
        Self {
            dns_timeout_ms: core.dns_timeout_ms,
            dns_attempts: core.dns_attempts,
            dns_cache_size: core.dns_cache_size,
            dns_min_ttl_secs: core.dns_min_ttl_secs,
            bloom_filter_fp_rate: core.bloom_filter_fp_rate,
            extra_disposable_domains: core.extra_disposable_domains,
            enable_typo_check: core.enable_typo_check,
            enable_disposable_check: core.enable_disposable_check,
            enable_mx_check: core.enable_mx_check,
            enable_smtp_probe: cfg!(feature = "smtp_probe"),
            mx_timeout_ms: core.mx_timeout_ms,
            smtp_timeout_ms: core.smtp_timeout_ms,
            smtp_port: core.smtp_port,
            smtp_helo_name: core.smtp_helo_name,
        }
    }
}

impl ValidationConfig {
    pub fn to_core(&self) -> mailbatch_core::ValidationConfig {
        mailbatch_core::ValidationConfig {
            dns_timeout_ms: self.dns_timeout_ms,
            dns_attempts: self.dns_attempts,
            dns_cache_size: self.dns_cache_size,
            dns_min_ttl_secs: self.dns_min_ttl_secs,
            bloom_filter_fp_rate: self.bloom_filter_fp_rate,
            extra_disposable_domains: self.extra_disposable_domains.clone(),
            enable_typo_check: self.enable_typo_check,
            enable_disposable_check: self.enable_disposable_check,
            enable_mx_check: self.enable_mx_check,
            enable_smtp_probe: self.enable_smtp_probe,
            mx_timeout_ms: self.mx_timeout_ms,
            smtp_timeout_ms: self.smtp_timeout_ms,
            smtp_port: self.smtp_port,
            smtp_helo_name: self.smtp_helo_name.clone(),
        }
    }
}

/// Batch run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Column holding the address when the request names none
    pub default_email_column: String,
    /// `MAIL FROM` for the SMTP probe when the request names none
    pub default_sender: Option<String>,
    /// Rows validated concurrently within one batch
    pub row_concurrency: usize,
    /// Longest wait for a progress subscriber before the first event
    pub subscriber_grace_ms: u64,
    /// Largest accepted batch
    pub max_rows: usize,
    /// Directory for `validated_<id>.csv` files; results are not persisted when unset
    pub output_dir: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_email_column: "email".to_string(),
            default_sender: None,
            row_concurrency: 8,
            subscriber_grace_ms: 300,
            max_rows: 10_000,
            output_dir: None,
        }
    }
}

impl BatchConfig {
    /// Orchestrator options, with the stages switched off in `validation`
    pub fn options(&self, validation: &ValidationConfig) -> BatchOptions {
        BatchOptions {
            row_concurrency: self.row_concurrency,
            subscriber_grace: Duration::from_millis(self.subscriber_grace_ms),
            disabled_stages: validation.to_core().disabled_stages(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable JSON structured logging
    pub json_logs: bool,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Service name attached to the startup log line
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
            service_name: "mailbatch-api".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.validation.dns_timeout_ms, 500);
        assert!(!config.observability.json_logs);
        assert_eq!(config.batch.default_email_column, "email");
        assert_eq!(config.batch.default_sender, None);
    }

    #[test]
    fn test_validation_config_defaults() {
        let config = ValidationConfig::default();
        assert_eq!(config.dns_attempts, 2);
        assert_eq!(config.dns_cache_size, 10_000);
        assert_eq!(config.bloom_filter_fp_rate, 0.0001);
        assert_eq!(config.mx_timeout_ms, 3_000);
        assert_eq!(config.smtp_timeout_ms, 5_000);
    }

    #[test]
    fn test_batch_options_carry_disabled_stages() {
        let validation = ValidationConfig {
            enable_smtp_probe: false,
            enable_typo_check: false,
            ..ValidationConfig::default()
        };
        let options = BatchConfig::default().options(&validation);

        assert_eq!(options.row_concurrency, 8);
        assert_eq!(options.subscriber_grace, Duration::from_millis(300));
        assert_eq!(options.disabled_stages, vec!["typo".to_string(), "smtp".to_string()]);
    }

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "mailbatch-api");
        assert_eq!(config.log_level, "info");
    }
}
