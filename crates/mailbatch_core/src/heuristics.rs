//! Typo detection heuristics using string distance algorithms
//!
//! Compares the second-level label of a domain against a curated list of major
//! email providers using Levenshtein distance.

use std::collections::{BTreeSet, HashSet};
use textdistance::str::levenshtein;
use tracing::debug;

/// Typo detector for identifying likely misspellings of major providers
pub struct TypoDetector {
    // Ordered so that ties between equally distant providers resolve the same way every run
    major_providers: BTreeSet<String>,
    valid_tlds: HashSet<String>,
}

impl TypoDetector {
    /// Create a new typo detector with default major providers and TLDs
    pub fn new() -> Self {
        let major_providers = Self::default_major_providers();
        let valid_tlds = Self::default_valid_tlds();

        debug!("Typo detector initialized with {} providers and {} TLDs",
               major_providers.len(), valid_tlds.len());

        Self {
            major_providers,
            valid_tlds,
        }
    }

    /// Create a typo detector with custom provider and TLD lists
    pub fn with_lists<P, T>(providers: P, tlds: T) -> Self
    where
        P: IntoIterator<Item = String>,
        T: IntoIterator<Item = String>,
    {
        Self {
            major_providers: providers.into_iter().map(|p| p.to_lowercase()).collect(),
            valid_tlds: tlds.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// Check if a domain might be a typo of a major provider
    ///
    /// # Returns
    /// * `Some(suggestion)` with the closest provider under the same TLD
    /// * `None` if the domain is a provider itself, has an unknown TLD, or is
    ///   not close to any provider
    pub fn check_typo(&self, domain: &str) -> Option<String> {
        let domain_lower = domain.to_lowercase();
        let (sld, tld) = domain_lower.split_once('.')?;

        if !self.valid_tlds.contains(tld) {
            debug!("Skipping typo check, unknown TLD: {}", tld);
            return None;
        }

        if self.major_providers.contains(sld) {
            return None;
        }

        let closest = self
            .major_providers
            .iter()
            .map(|provider| (levenshtein(sld, provider), provider))
            .filter(|(distance, provider)| Self::is_typo_distance(*distance, provider))
            .min_by_key(|(distance, _)| *distance);

        let (distance, provider) = closest?;
        let suggestion = format!("{}.{}", provider, tld);
        debug!("Potential typo detected: {} -> {} (distance: {})",
               domain, suggestion, distance);
        Some(suggestion)
    }

    /// Distance 1 for short provider names (up to 6 chars), up to 2 for longer ones
    fn is_typo_distance(distance: usize, provider: &str) -> bool {
        if provider.len() <= 6 {
            distance == 1
        } else {
            distance > 0 && distance <= 2
        }
    }

    /// Get the default list of major email providers (SLD only)
    fn default_major_providers() -> BTreeSet<String> {
        [
            // Google
            "gmail", "googlemail",

            // Microsoft
            "outlook", "hotmail", "live", "msn",

            // Yahoo
            "yahoo", "ymail", "rocketmail",

            // Apple
            "icloud", "me", "mac",

            "aol",
            "protonmail", "proton",
            "tutanota", "tuta",
            "fastmail",
            "zoho",
            "yandex",
            "mail", "email",

            // Country-specific major providers
            "gmx", // Germany
            "web", // Germany (web.de)
            "t-online", // Germany
            "orange", // France
            "free", // France
            "laposte", // France
            "libero", // Italy
            "virgilio", // Italy
            "naver", // South Korea
            "daum", // South Korea
            "qq", // China
            "163", // China (163.com)
            "126", // China (126.com)
            "sina", // China
            "sohu", // China
            "rediffmail", // India
        ]
        .iter()
        .map(|&s| s.to_string())
        .collect()
    }

    /// Get the default list of TLDs the typo check applies to
    fn default_valid_tlds() -> HashSet<String> {
        [
            // Generic TLDs
            "com", "org", "net", "edu", "gov", "info", "biz",

            "email", "mail", "online", "site", "app", "dev", "io",

            // Country code TLDs (major ones)
            "us", "uk", "co.uk", "ca", "au", "com.au", "de", "fr", "it",
            "es", "nl", "be", "ch", "at", "se", "no", "dk", "fi", "pl",
            "cz", "ru", "ua", "jp", "kr", "co.kr", "cn", "com.cn", "hk",
            "tw", "sg", "in", "co.in", "br", "com.br", "mx", "com.mx",
            "ar", "com.ar", "co", "za", "co.za",

            // Special use
            "test", "example",
        ]
        .iter()
        .map(|&s| s.to_string())
        .collect()
    }

    /// Add a custom major provider to the list
    pub fn add_major_provider(&mut self, provider: String) {
        self.major_providers.insert(provider.to_lowercase());
    }

    /// Get the number of major providers being tracked
    pub fn provider_count(&self) -> usize {
        self.major_providers.len()
    }

    /// Get the number of valid TLDs being tracked
    pub fn tld_count(&self) -> usize {
        self.valid_tlds.len()
    }
}

impl Default for TypoDetector {
    fn default() -> Self {
        Self::new()
    }
}
