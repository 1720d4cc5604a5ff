//! In-memory store of finished async search results
//!
//! Bodies above a small threshold are zstd-compressed. The store keeps a
//! running byte total so admission control can check it without walking
//! every entry.

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bodies smaller than this are stored as is
const COMPRESSION_THRESHOLD: usize = 1024;
const ZSTD_LEVEL: i32 = 3;

/// Outcome of one async search, as kept until it is fetched or deleted.
#[derive(Debug, Clone)]
pub struct AsyncRequestResult {
    body: Bytes,
    compressed: bool,
    error: Option<String>,
    took: Duration,
}

impl AsyncRequestResult {
    pub fn success(body: Vec<u8>, took: Duration) -> Result<Self> {
        let (body, compressed) = if body.len() >= COMPRESSION_THRESHOLD {
            (zstd::encode_all(body.as_slice(), ZSTD_LEVEL)?, true)
        } else {
            (body, false)
        };
        Ok(Self {
            body: Bytes::from(body),
            compressed,
            error: None,
            took,
        })
    }

    pub fn failure(error: impl Into<String>, took: Duration) -> Self {
        Self {
            body: Bytes::new(),
            compressed: false,
            error: Some(error.into()),
            took,
        }
    }

    /// Uncompressed response body
    pub fn response_body(&self) -> Result<Vec<u8>> {
        if self.compressed {
            zstd::decode_all(self.body.as_ref()).map_err(Error::from)
        } else {
            Ok(self.body.to_vec())
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes held in memory for this entry
    pub fn size_bytes(&self) -> u64 {
        (self.body.len() + self.error.as_ref().map_or(0, String::len)) as u64
    }

    pub fn took(&self) -> Duration {
        self.took
    }
}

pub trait AsyncResultStore: Send + Sync {
    fn store(&self, id: &str, result: AsyncRequestResult);
    fn load(&self, id: &str) -> Option<AsyncRequestResult>;
    fn delete(&self, id: &str) -> Option<AsyncRequestResult>;
    fn entry_count(&self) -> usize;
    fn size_bytes(&self) -> u64;
}

#[derive(Clone, Default)]
pub struct InMemoryAsyncResultStore {
    entries: Arc<RwLock<HashMap<String, AsyncRequestResult>>>,
    current_size_bytes: Arc<AtomicU64>,
}

impl InMemoryAsyncResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish_gauges(&self, entries: usize) {
        crate::metrics::update_async_store(entries, self.size_bytes());
    }
}

impl AsyncResultStore for InMemoryAsyncResultStore {
    fn store(&self, id: &str, result: AsyncRequestResult) {
        let size = result.size_bytes();
        let count = {
            let mut entries = self.entries.write();
            if let Some(old) = entries.insert(id.to_string(), result) {
                self.current_size_bytes
                    .fetch_sub(old.size_bytes(), Ordering::Relaxed);
            }
            self.current_size_bytes.fetch_add(size, Ordering::Relaxed);
            entries.len()
        };
        self.publish_gauges(count);
    }

    fn load(&self, id: &str) -> Option<AsyncRequestResult> {
        self.entries.read().get(id).cloned()
    }

    fn delete(&self, id: &str) -> Option<AsyncRequestResult> {
        let (removed, count) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(id);
            if let Some(entry) = &removed {
                self.current_size_bytes
                    .fetch_sub(entry.size_bytes(), Ordering::Relaxed);
            }
            (removed, entries.len())
        };
        if removed.is_some() {
            self.publish_gauges(count);
        }
        removed
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    fn size_bytes(&self) -> u64 {
        self.current_size_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_body_not_compressed() {
        let result = AsyncRequestResult::success(b"{}".to_vec(), Duration::ZERO).unwrap();
        assert!(!result.is_compressed());
        assert_eq!(result.response_body().unwrap(), b"{}");
    }

    #[test]
    fn test_large_body_compressed() {
        let body = "{\"hits\":[]}".repeat(500).into_bytes();
        let result = AsyncRequestResult::success(body.clone(), Duration::ZERO).unwrap();
        assert!(result.is_compressed());
        assert!(result.size_bytes() < body.len() as u64);
        assert_eq!(result.response_body().unwrap(), body);
    }

    #[test]
    fn test_store_load_delete() {
        let store = InMemoryAsyncResultStore::new();
        store.store(
            "a",
            AsyncRequestResult::success(b"hello".to_vec(), Duration::ZERO).unwrap(),
        );
        store.store("b", AsyncRequestResult::failure("boom", Duration::ZERO));
        assert_eq!(store.entry_count(), 2);
        assert_eq!(store.size_bytes(), 9);

        assert_eq!(store.load("b").unwrap().error(), Some("boom"));
        assert!(store.delete("a").is_some());
        assert!(store.delete("a").is_none());
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.size_bytes(), 4);
    }

    #[test]
    fn test_overwrite_adjusts_size() {
        let store = InMemoryAsyncResultStore::new();
        store.store("a", AsyncRequestResult::failure("12345", Duration::ZERO));
        store.store("a", AsyncRequestResult::failure("12", Duration::ZERO));
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.size_bytes(), 2);
    }
}
