//! Storage backend seam.
//!
//! The coordination engine never touches bytes at rest directly; it talks to
//! a `Storage` implementation. Failures map to `Error::Storage` and fail only
//! the affected upload or download.

use std::collections::HashMap;
use std::future::Future;

use bytes::Bytes;
use tokio::sync::Mutex;

use qdrop_core::error::{Error, Result};

/// Object storage for uploaded file bytes.
pub trait Storage: Send + Sync + 'static {
    /// Persist `data` under `key`, overwriting any previous object.
    fn put(&self, key: &str, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the object stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Bytes>> + Send;

    /// Remove the object stored under `key`. Removing an absent key is a
    /// no-op: deletion races with sweeps are expected.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory storage used by tests and the default standalone server.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, for assertions in tests.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage {
                message: format!("no object stored under {key:?}"),
            })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}
