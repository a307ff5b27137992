//! Deterministic identity for subscription wiring.
//!
//! The fingerprint is the only reconciliation key: there is no state store,
//! so the id written on a bucket entry must be re-derivable from the declared
//! wiring on every run.
//!
//! Format: `{namespace}{hex(sha256(material))[0..32]}`
//!
//! The material is a domain tag followed by length-prefixed fields, so no
//! pair of distinct wirings can produce the same byte string:
//!
//! ```text
//! "hookwire.subscription.v1"
//! len(address) address
//! count(events) { len(event) event }*
//! count(rules)  { len(kind) kind len(pattern) pattern }*
//! ```
//!
//! Event types keep their declared order (duplicates collapsed). Filter rules
//! are stable-sorted by rule kind before hashing.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::subscription::{FilterRule, normalize_event_types, sorted_rules};

/// Namespace tag used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "exS3-v2--";

/// Hex chars of the digest kept in a fingerprint (128 bits).
pub const FINGERPRINT_DIGEST_LEN: usize = 32;

const FINGERPRINT_DOMAIN: &[u8] = b"hookwire.subscription.v1";

/// Prefix tag that marks identifiers written by this system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Creates a namespace tag.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the tag is empty or contains a
    /// character outside `[A-Za-z0-9_-]`.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::InvalidInput("namespace must not be empty".into()));
        }
        if let Some(bad) = tag
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidInput(format!(
                "namespace '{tag}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self(tag))
    }

    /// Returns the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `id` has the shape of an identifier minted under this
    /// namespace: the tag followed by a non-empty run of hex digits.
    #[must_use]
    pub fn owns(&self, id: &str) -> bool {
        id.strip_prefix(self.0.as_str())
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()))
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

/// Namespaced identifier of one wiring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    value: String,
    digest_start: usize,
}

impl Fingerprint {
    /// Full identifier, as written on the bucket entry.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The hex digest without the namespace tag.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.value[self.digest_start..]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Computes the fingerprint of a resolved wiring.
///
/// Pure and total: equal wirings always map to equal fingerprints.
#[must_use]
pub fn fingerprint(
    namespace: &Namespace,
    resolved_address: &str,
    event_types: &[String],
    filter_rules: &[FilterRule],
) -> Fingerprint {
    let event_types = normalize_event_types(event_types);
    let filter_rules = sorted_rules(filter_rules);

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    update_field(&mut hasher, resolved_address.as_bytes());
    update_len(&mut hasher, event_types.len());
    for event_type in &event_types {
        update_field(&mut hasher, event_type.as_bytes());
    }
    update_len(&mut hasher, filter_rules.len());
    for rule in &filter_rules {
        update_field(&mut hasher, rule.name.as_bytes());
        update_field(&mut hasher, rule.value.as_bytes());
    }
    let hash = hasher.finalize();
    let encoded = hex::encode(hash);
    let digest = encoded.get(..FINGERPRINT_DIGEST_LEN).unwrap_or(&encoded);

    Fingerprint {
        value: format!("{namespace}{digest}"),
        digest_start: namespace.as_str().len(),
    }
}

fn update_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    update_len(hasher, bytes.len());
    hasher.update(bytes);
}
