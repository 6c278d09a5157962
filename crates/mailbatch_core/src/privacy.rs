//! Pseudonymization of addresses before they reach the logs
//!
//! Log lines carry a salted hash of the local part and the plain domain, e.g.
//! `3f9a1c02…@example.com`. The domain stays readable because DNS and SMTP
//! diagnostics are useless without it.

use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

/// Hex characters of the digest kept in redacted output
const DIGEST_PREFIX_LEN: usize = 12;

/// Salted hashing of the local part of an address
#[derive(Clone)]
pub struct AddressRedactor {
    salt: Vec<u8>,
}

impl AddressRedactor {
    pub fn new(salt: Vec<u8>) -> Self {
        debug!("Address redactor initialized with {}-byte salt", salt.len());
        Self { salt }
    }

    /// Redactor with a fresh per-process salt
    ///
    /// Hashes are stable for the lifetime of the redactor only, so the same
    /// address can be followed through one run's logs but not across restarts.
    pub fn with_random_salt() -> Self {
        let salt = [uuid::Uuid::new_v4().into_bytes(), uuid::Uuid::new_v4().into_bytes()].concat();
        Self::new(salt)
    }

    /// Hex-encoded SHA-256 of the salted local part
    pub fn hash_local_part(&self, local_part: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(local_part.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Loggable stand-in for an address
    pub fn redact<'a>(&'a self, address: &'a str) -> Redacted<'a> {
        Redacted {
            redactor: self,
            address,
        }
    }
}

impl fmt::Debug for AddressRedactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRedactor")
            .field("salt", &"<redacted>")
            .finish()
    }
}

/// Lazily formatted redacted address, hashed only if the log line is emitted
pub struct Redacted<'a> {
    redactor: &'a AddressRedactor,
    address: &'a str,
}

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() => {
                let digest = self.redactor.hash_local_part(local);
                write!(f, "{}@{}", &digest[..DIGEST_PREFIX_LEN], domain.to_lowercase())
            }
            _ => {
                let digest = self.redactor.hash_local_part(self.address);
                write!(f, "<unparsed:{}>", &digest[..DIGEST_PREFIX_LEN])
            }
        }
    }
}
