//! `Dragonfly` (Redis-compatible) `DocumentStore` backend.
//!
//! Each document lives in a hash with two fields: `v` (the version
//! counter) and `d` (the JSON body). The conditional writes are Lua
//! scripts, so the compare-version-then-write runs atomically inside
//! the store -- the server serializes scripts on a key, which is exactly
//! the single-document atomicity the CAS helpers require.
//!
//! Key patterns are defined in [`crate::keys`].

use fred::prelude::*;

use crate::error::StoreError;
use crate::store::{DocumentStore, RawDoc};

/// Insert-if-absent: `HSET` only when the key does not exist yet.
const CREATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'd', ARGV[2])
return 1
";

/// Replace-if-version: `HSET` only when the stored version matches.
const REPLACE_SCRIPT: &str = r"
local v = redis.call('HGET', KEYS[1], 'v')
if v == ARGV[1] then
  redis.call('HSET', KEYS[1], 'v', ARGV[2], 'd', ARGV[3])
  return 1
end
return 0
";

/// Remove-if-version: `DEL` only when the stored version matches.
const REMOVE_SCRIPT: &str = r"
local v = redis.call('HGET', KEYS[1], 'v')
if v == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
";

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and implements
/// [`DocumentStore`] with Lua-scripted version CAS.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl DocumentStore for DragonflyStore {
    async fn load(&self, key: &str) -> Result<Option<RawDoc>, StoreError> {
        let row: (Option<String>, Option<String>) =
            self.client.hmget(key, vec!["v", "d"]).await?;
        let (Some(version_raw), Some(body_raw)) = row else {
            return Ok(None);
        };
        let version = version_raw.parse::<u64>().map_err(|e| StoreError::Decode {
            context: format!("document {key} has a non-integer version: {e}"),
        })?;
        let body = serde_json::from_str(&body_raw)?;
        Ok(Some(RawDoc { version, body }))
    }

    async fn create(&self, key: &str, body: &serde_json::Value) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(body)?;
        let created: i64 = self
            .client
            .eval(
                CREATE_SCRIPT,
                vec![key.to_owned()],
                vec!["1".to_owned(), payload],
            )
            .await?;
        Ok(created == 1)
    }

    async fn replace_if_version(
        &self,
        key: &str,
        expected: u64,
        body: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(body)?;
        let next = expected.saturating_add(1);
        let replaced: i64 = self
            .client
            .eval(
                REPLACE_SCRIPT,
                vec![key.to_owned()],
                vec![expected.to_string(), next.to_string(), payload],
            )
            .await?;
        Ok(replaced == 1)
    }

    async fn remove_if_version(&self, key: &str, expected: u64) -> Result<bool, StoreError> {
        let removed: i64 = self
            .client
            .eval(
                REMOVE_SCRIPT,
                vec![key.to_owned()],
                vec![expected.to_string()],
            )
            .await?;
        Ok(removed == 1)
    }
}
