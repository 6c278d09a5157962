//! Disposable domain detection using Bloom filters
//!
//! The bundled list lives in `data/disposable_domains.txt`, one domain per
//! line, `#` for comments.

use crate::stages::is_valid_domain_format;
use anyhow::Result;
use fastbloom::BloomFilter;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Bundled list of known throwaway-mail domains
pub const BUNDLED_LIST: &str = include_str!("../data/disposable_domains.txt");

/// Disposable domain lookup backed by a Bloom filter
pub struct DisposableDetector {
    bloom_filter: BloomFilter,
    domain_count: usize,
    estimated_memory_usage: usize,
}

impl DisposableDetector {
    /// Create a new disposable detector from a list of domains
    ///
    /// # Arguments
    /// * `domains` - Iterator of domain strings to add to the filter
    /// * `false_positive_rate` - Desired false positive rate (e.g., 0.0001 for 0.01%)
    pub fn new<I>(domains: I, false_positive_rate: f64) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let domains: HashSet<String> = domains.into_iter().map(|d| d.trim().to_lowercase()).collect();
        let domain_count = domains.len();

        if domain_count == 0 {
            return Err(anyhow::anyhow!("No domains provided for disposable detection"));
        }

        let bloom_filter = BloomFilter::with_false_pos(false_positive_rate)
            .items(domains.iter());

        let estimated_bits = Self::calculate_optimal_bits(domain_count, false_positive_rate);
        let estimated_memory = estimated_bits.div_ceil(8);

        info!(
            "Disposable detector initialized with {} domains, ~{} KB memory, {:.4}% false positive rate",
            domain_count,
            estimated_memory / 1024,
            false_positive_rate * 100.0
        );

        Ok(Self {
            bloom_filter,
            domain_count,
            estimated_memory_usage: estimated_memory,
        })
    }

    /// Build from list file content plus extra configured domains
    pub fn from_list_txt(list_content: &str, extra: &[String], false_positive_rate: f64) -> Result<Self> {
        let mut domains = parse_disposable_list(list_content)?;
        domains.extend(extra.iter().map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty()));
        Self::new(domains, false_positive_rate)
    }

    /// Build from the bundled list
    pub fn bundled(extra: &[String], false_positive_rate: f64) -> Result<Self> {
        Self::from_list_txt(BUNDLED_LIST, extra, false_positive_rate)
    }

    /// Check whether a domain, or any parent domain of it, is listed
    ///
    /// `inbox.mailinator.com` matches a `mailinator.com` entry. Bare TLDs are
    /// never looked up.
    pub fn is_disposable(&self, domain: &str) -> bool {
        let normalized = domain.trim().trim_end_matches('.').to_lowercase();

        let mut candidate = normalized.as_str();
        loop {
            if self.bloom_filter.contains(candidate) {
                debug!("Domain '{}' flagged as disposable via '{}'", normalized, candidate);
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return false,
            }
        }
    }

    /// Get the number of domains in the filter
    pub fn domain_count(&self) -> usize {
        self.domain_count
    }

    /// Get the estimated memory usage of the Bloom filter in bytes
    pub fn memory_usage(&self) -> usize {
        self.estimated_memory_usage
    }

    /// Formula: m = -(n * ln(p)) / (ln(2)^2)
    fn calculate_optimal_bits(item_count: usize, false_positive_rate: f64) -> usize {
        let n = item_count as f64;
        let p = false_positive_rate;
        let ln2_squared = (2.0_f64).ln().powi(2);

        let optimal_bits = (-n * p.ln()) / ln2_squared;
        optimal_bits.ceil() as usize
    }
}

/// Parse the disposable domain list
fn parse_disposable_list(content: &str) -> Result<HashSet<String>> {
    let mut domains = HashSet::new();
    let mut invalid_count = 0;

    for (line_number, line) in content.lines().enumerate() {
        let domain = line.trim();

        if domain.is_empty() || domain.starts_with('#') {
            continue;
        }

        let domain = domain.to_lowercase();
        if is_valid_domain_format(&domain) {
            domains.insert(domain);
        } else {
            invalid_count += 1;
            if invalid_count <= 10 {
                warn!("Invalid domain format at line {}: '{}'", line_number + 1, domain);
            }
        }
    }

    if invalid_count > 10 {
        warn!("... and {} more invalid domain entries", invalid_count - 10);
    }

    debug!("Parsed {} disposable domains ({} invalid entries)", domains.len(), invalid_count);

    if domains.is_empty() {
        return Err(anyhow::anyhow!("No valid domains found in list"));
    }

    Ok(domains)
}
