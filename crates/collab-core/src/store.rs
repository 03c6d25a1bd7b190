//! Content-addressed revision storage.
//!
//! Layout: one directory per document under the filesystem root, one file per
//! revision named by its [`RevisionId`], holding the full document text.
//!
//! ```text
//! <root>/<document>/<revision id>
//! ```
//!
//! Revisions are ordered by modification time, oldest first. Re-committing
//! identical content rewrites the same file, which makes it the newest.

use crate::fingerprint::RevisionId;
use crate::fs::{FileSystem, FsError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Longest document name accepted, in bytes.
pub const MAX_DOCUMENT_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid document name {name:?}: {reason}")]
    InvalidDocumentName { name: String, reason: &'static str },

    #[error("Revision {revision} of {document} is not valid UTF-8")]
    InvalidUtf8 { document: String, revision: RevisionId },

    #[error(transparent)]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Check that `name` can be used as a storage namespace.
pub fn validate_document_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_DOCUMENT_NAME_LEN {
        Some("name is too long")
    } else if name == "." || name == ".." {
        Some("name is a relative path component")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator or NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidDocumentName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Persists document snapshots addressed by [`RevisionId`].
#[derive(Clone)]
pub struct RevisionStore {
    fs: Arc<dyn FileSystem>,
}

impl RevisionStore {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Create the document's namespace if it doesn't exist yet.
    pub async fn ensure_namespace(&self, document: &str) -> Result<()> {
        validate_document_name(document)?;
        self.fs.mkdir(document).await?;
        Ok(())
    }

    /// Store `content` as a revision of `document`.
    ///
    /// Writing the same content twice overwrites the same artifact.
    pub async fn put(&self, document: &str, content: &str) -> Result<RevisionId> {
        validate_document_name(document)?;
        let id = RevisionId::compute(document, content);
        self.fs.mkdir(document).await?;
        self.fs
            .write(&format!("{}/{}", document, id), content.as_bytes())
            .await?;
        debug!("Stored revision {} of {}", id, document);
        Ok(id)
    }

    /// All revisions of `document`, oldest first. Empty if none were stored.
    pub async fn list(&self, document: &str) -> Result<Vec<RevisionId>> {
        validate_document_name(document)?;
        if !self.fs.exists(document).await? {
            return Ok(Vec::new());
        }

        let entries = match self.fs.list(document).await {
            Ok(entries) => entries,
            Err(FsError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut revisions = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            let stat = self
                .fs
                .stat(&format!("{}/{}", document, entry.name))
                .await?;
            revisions.push((stat.mtime_nanos, RevisionId::from_stored(entry.name)));
        }

        // Ties on mtime fall back to the id so the order is total.
        revisions.sort();
        Ok(revisions.into_iter().map(|(_, id)| id).collect())
    }

    /// Content of the most recently written revision, if any.
    pub async fn latest(&self, document: &str) -> Result<Option<String>> {
        let Some(revision) = self.list(document).await?.pop() else {
            return Ok(None);
        };
        self.read(document, &revision).await.map(Some)
    }

    /// Content of one revision.
    pub async fn read(&self, document: &str, revision: &RevisionId) -> Result<String> {
        validate_document_name(document)?;
        let bytes = self
            .fs
            .read(&format!("{}/{}", document, revision))
            .await?;
        String::from_utf8(bytes).map_err(|_| StoreError::InvalidUtf8 {
            document: document.to_string(),
            revision: revision.clone(),
        })
    }
}
