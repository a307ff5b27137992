//! Invoke-permission statements.
//!
//! Each resolved wiring needs exactly one statement on its target allowing
//! the storage service to invoke it for events from the wiring's bucket.
//! Statement ids are derived from the full wiring (target, bucket and the
//! wiring fingerprint), so two filter sets on the same target/bucket pair get
//! distinct statements.
//!
//! ## Statement id format
//!
//! ```text
//! {namespace}{sanitize(target)}-{sanitize(bucket)}-{fingerprint_digest[0..12]}
//! ```
//!
//! The permission API caps ids at [`MAX_STATEMENT_ID_LEN`] chars. Longer ids
//! keep their first 68 chars and append `hex(sha256(full_id))[0..32]`, giving
//! exactly 100 chars.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fingerprint::{Fingerprint, Namespace};
use crate::subscription::ResolvedSubscription;

/// Action granted by every statement.
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Principal of the storage service.
pub const STORAGE_PRINCIPAL: &str = "s3.amazonaws.com";

/// Maximum statement id length accepted by the permission API.
pub const MAX_STATEMENT_ID_LEN: usize = 100;

const TRUNCATED_PREFIX_LEN: usize = 68;
const TRUNCATED_DIGEST_LEN: usize = MAX_STATEMENT_ID_LEN - TRUNCATED_PREFIX_LEN;
const WIRING_DIGEST_LEN: usize = 12;

/// A permission statement on a compute target's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatement {
    /// Logical target the policy belongs to.
    pub target_id: String,
    /// Statement identifier, unique within the target's policy.
    pub statement_id: String,
    /// Granted action.
    pub action: String,
    /// Principal allowed to perform the action.
    pub principal: String,
    /// Resource the principal must be acting from.
    pub source_arn: String,
    /// Alias or version the statement is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

impl PermissionStatement {
    /// Builds the statement a resolved wiring requires.
    #[must_use]
    pub fn for_wiring(
        namespace: &Namespace,
        wiring: &ResolvedSubscription,
        qualifier: Option<&str>,
    ) -> Self {
        Self {
            target_id: wiring.target_id().to_string(),
            statement_id: statement_id(
                namespace,
                wiring.target_id(),
                wiring.bucket(),
                &wiring.fingerprint,
            ),
            action: INVOKE_ACTION.to_string(),
            principal: STORAGE_PRINCIPAL.to_string(),
            source_arn: bucket_arn(wiring.bucket()),
            qualifier: qualifier.map(str::to_string),
        }
    }

    /// Returns true if this statement was written under `namespace`.
    #[must_use]
    pub fn is_owned_by(&self, namespace: &Namespace) -> bool {
        self.principal == STORAGE_PRINCIPAL && self.statement_id.starts_with(namespace.as_str())
    }

    /// Returns true if both statements grant the same access.
    ///
    /// Target and id are not compared: callers look statements up by id.
    #[must_use]
    pub fn grants_same_access(&self, other: &Self) -> bool {
        self.action == other.action
            && self.principal == other.principal
            && self.source_arn == other.source_arn
            && self.qualifier == other.qualifier
    }
}

/// A target's permission policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Statements in the policy.
    #[serde(default)]
    pub statements: Vec<PermissionStatement>,
}

impl Policy {
    /// Finds a statement by id.
    #[must_use]
    pub fn find(&self, statement_id: &str) -> Option<&PermissionStatement> {
        self.statements
            .iter()
            .find(|s| s.statement_id == statement_id)
    }
}

/// Resource name of a bucket, used as the statement source.
#[must_use]
pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

/// Derives the statement id for a wiring.
#[must_use]
pub fn statement_id(
    namespace: &Namespace,
    target_id: &str,
    bucket: &str,
    fingerprint: &Fingerprint,
) -> String {
    let digest = fingerprint.digest();
    let short = digest.get(..WIRING_DIGEST_LEN).unwrap_or(digest);
    let id = format!(
        "{namespace}{}-{}-{short}",
        sanitize(target_id),
        sanitize(bucket)
    );
    if id.len() <= MAX_STATEMENT_ID_LEN {
        return id;
    }

    let hash = hex::encode(Sha256::digest(id.as_bytes()));
    let prefix: String = id.chars().take(TRUNCATED_PREFIX_LEN).collect();
    format!(
        "{prefix}{}",
        hash.get(..TRUNCATED_DIGEST_LEN).unwrap_or(&hash)
    )
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
