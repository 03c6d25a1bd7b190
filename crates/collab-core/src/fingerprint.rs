//! Content addressing for revisions.
//!
//! A revision is identified by the SHA-256 of the document name and the full
//! document text, so the same commit maps to the same identifier on every run.

use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a stored revision (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId(String);

impl RevisionId {
    /// Compute the identifier for `content` committed to `document`.
    ///
    /// The name is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
    pub fn compute(document: &str, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((document.len() as u64).to_le_bytes());
        hasher.update(document.as_bytes());
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an identifier read back from storage.
    pub fn from_stored(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
