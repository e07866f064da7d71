// Short-lived request state cache
//
// The HTTP surface reads request state through the `StateStore` trait;
// the orchestration path writes the latest state under `query:{request_id}`
// with a one-hour TTL. Redis backs production; the in-memory store backs
// tests and key-less development. The redaction map is never written here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

/// Default TTL for request state entries
pub const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("value is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Async key-value store over string keys and JSON values
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;
}

/// Key under which a request's latest state lives
pub fn request_key(request_id: &str) -> String {
    format!("query:{request_id}")
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// TTL-aware in-memory store for tests and Redis-less runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Redis store
// ─────────────────────────────────────────────────────────────────────────────

/// Redis-backed store using a multiplexed connection manager
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!("connected to redis at {url}");
        Ok(Self { connection })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let encoded = serde_json::to_string(&value)?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(encoded)
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
