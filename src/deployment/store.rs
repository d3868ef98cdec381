//! # Blob storage contract for deployment records.
//!
//! Deployment content and pointers live in a [`BlobStore`] offering conditional
//! reads and writes. [`put_if_absent_or_update`] layers optimistic concurrency
//! on top: read, resolve, conditionally write, retry on conflict.

use async_trait::async_trait;

use crate::error::StorageError;

/// Attempts made by [`put_if_absent_or_update`] before reporting contention.
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Opaque version tag of a stored blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ETag(pub String);

/// Result of [`BlobStore::get_if_modified`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    /// The blob still carries the known tag.
    NotModified,
    /// The blob does not exist.
    Missing,
    /// The blob changed (or no tag was known).
    Modified {
        /// Current content.
        content: Vec<u8>,
        /// Current tag.
        etag: ETag,
    },
}

/// Result of [`BlobStore::compare_and_put`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Written; carries the new tag.
    Written(ETag),
    /// The precondition failed.
    Conflict,
}

/// Blob storage with conditional operations.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Reads a blob and its tag.
    async fn get(&self, name: &str) -> Result<Option<(Vec<u8>, ETag)>, StorageError>;

    /// Reads a blob only if its tag differs from `known`.
    async fn get_if_modified(&self, name: &str, known: Option<&ETag>) -> Result<Fetched, StorageError>;

    /// Writes a blob only if it does not exist yet. Returns whether it was written.
    async fn put_if_absent(&self, name: &str, content: Vec<u8>) -> Result<bool, StorageError>;

    /// Writes a blob if its current tag equals `expected` (`None` = must be absent).
    async fn compare_and_put(
        &self,
        name: &str,
        expected: Option<&ETag>,
        content: Vec<u8>,
    ) -> Result<PutOutcome, StorageError>;
}

/// Decision of an update resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Leave the blob untouched.
    Skip,
    /// Replace the blob with this content.
    Apply(Vec<u8>),
}

/// Result of [`put_if_absent_or_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upserted {
    /// The resolver chose to skip.
    Skipped,
    /// The blob was written.
    Written(ETag),
}

/// Creates or updates `name` through `resolve`, retrying on write conflicts.
///
/// `resolve` receives the current content (`None` when absent) and is invoked
/// again after each conflict with the fresh content.
pub async fn put_if_absent_or_update<F, E>(
    store: &dyn BlobStore,
    name: &str,
    mut resolve: F,
) -> Result<Upserted, E>
where
    F: FnMut(Option<&[u8]>) -> Result<Resolution, E>,
    E: From<StorageError>,
{
    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let current = store.get(name).await?;
        let content = match resolve(current.as_ref().map(|(c, _)| c.as_slice()))? {
            Resolution::Skip => return Ok(Upserted::Skipped),
            Resolution::Apply(content) => content,
        };
        let expected = current.as_ref().map(|(_, etag)| etag);
        match store.compare_and_put(name, expected, content).await? {
            PutOutcome::Written(etag) => return Ok(Upserted::Written(etag)),
            PutOutcome::Conflict => continue,
        }
    }
    Err(StorageError::Contention {
        name: name.to_string(),
    }
    .into())
}
