//! In-process `DocumentStore` backend.
//!
//! Used by the engine's test suites and by embedded single-process runs.
//! A `tokio` `RwLock` over a key-to-document map gives the same
//! semantics as the production backend: the compare-and-bump inside the
//! write lock is indivisible, so conditional writes against the same key
//! serialize with at most one winner per version.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{DocumentStore, RawDoc};

/// In-memory versioned document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, RawDoc>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held. Test convenience.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Whether the store holds no documents. Test convenience.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<RawDoc>, StoreError> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn create(&self, key: &str, body: &serde_json::Value) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(
            key.to_owned(),
            RawDoc {
                version: 1,
                body: body.clone(),
            },
        );
        Ok(true)
    }

    async fn replace_if_version(
        &self,
        key: &str,
        expected: u64,
        body: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(key) {
            Some(doc) if doc.version == expected => {
                doc.version = doc.version.saturating_add(1);
                doc.body = body.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if_version(&self, key: &str, expected: u64) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.get(key) {
            Some(doc) if doc.version == expected => {
                docs.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
