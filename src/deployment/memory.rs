//! # In-memory blob store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::store::{BlobStore, ETag, Fetched, PutOutcome};
use crate::error::StorageError;

/// Blob store kept in process memory; tags are per-write version numbers.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, ETag)>>,
    version: AtomicU64,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted names of all stored blobs.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, ETag)>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_tag(&self) -> ETag {
        ETag(format!("\"{}\"", self.version.fetch_add(1, Ordering::Relaxed) + 1))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, name: &str) -> Result<Option<(Vec<u8>, ETag)>, StorageError> {
        Ok(self.lock().get(name).cloned())
    }

    async fn get_if_modified(&self, name: &str, known: Option<&ETag>) -> Result<Fetched, StorageError> {
        Ok(match self.lock().get(name) {
            None => Fetched::Missing,
            Some((_, etag)) if Some(etag) == known => Fetched::NotModified,
            Some((content, etag)) => Fetched::Modified {
                content: content.clone(),
                etag: etag.clone(),
            },
        })
    }

    async fn put_if_absent(&self, name: &str, content: Vec<u8>) -> Result<bool, StorageError> {
        let tag = self.next_tag();
        let mut blobs = self.lock();
        if blobs.contains_key(name) {
            return Ok(false);
        }
        blobs.insert(name.to_string(), (content, tag));
        Ok(true)
    }

    async fn compare_and_put(
        &self,
        name: &str,
        expected: Option<&ETag>,
        content: Vec<u8>,
    ) -> Result<PutOutcome, StorageError> {
        let tag = self.next_tag();
        let mut blobs = self.lock();
        if blobs.get(name).map(|(_, etag)| etag) != expected {
            return Ok(PutOutcome::Conflict);
        }
        blobs.insert(name.to_string(), (content, tag.clone()));
        Ok(PutOutcome::Written(tag))
    }
}
