//! Key-value backends for rate-limiter state.
//!
//! Production uses a Redis-compatible REST endpoint (command arrays over
//! HTTP); tests use an in-memory map with the same TTL semantics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("kv protocol error: {0}")]
    Protocol(String),
}

/// Minimal slice of the key-value protocol the limiter needs: a read and a
/// write with expiry. Idle keys expire and reset the bucket naturally.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError>;
}

/// Client for a Redis-compatible REST gateway. Commands are posted as JSON
/// arrays (`["SET", key, value, "EX", "60"]`) with a bearer token.
pub struct RedisRestStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RedisRestStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn command(&self, command: serde_json::Value) -> Result<serde_json::Value, KvError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KvError::Protocol(format!(
                "kv store returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        match body.get("result") {
            Some(result) => Ok(result.clone()),
            None => Err(KvError::Protocol("missing result field".into())),
        }
    }
}

#[async_trait]
impl KvStore for RedisRestStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let result = self.command(json!(["GET", key])).await?;
        match result {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(value) => Ok(Some(value)),
            other => Err(KvError::Protocol(format!("unexpected GET result: {other}"))),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        self.command(json!(["SET", key, value, "EX", ttl_secs.to_string()]))
            .await?;
        Ok(())
    }
}

/// In-memory store honoring TTLs. Used by tests and as a single-process
/// fallback when no KV endpoint is configured.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KvError::Protocol("store lock poisoned".into()))?;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KvError::Protocol("store lock poisoned".into()))?;
        entries.insert(
            key.to_string(),
            (value.to_string(), Instant::now() + Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryKvStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
