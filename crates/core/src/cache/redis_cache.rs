//! Redis cache backend
//!
//! Keys are stored as plain strings with `SET EX`. An optional prefix is
//! prepended to every key and pattern so several environments can share a
//! server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Cache, CacheError};

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to `url`, giving up after `timeout`
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(timeout))??;

        tracing::info!("Redis connected");
        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    fn format_key(&self, key: &str) -> String {
        prefixed(&self.key_prefix, key)
    }

    /// KEYS pattern; the prefix is matched literally
    fn format_pattern(&self, pattern: &str) -> String {
        prefixed(&escape_glob(&self.key_prefix), pattern)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.format_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(self.format_key(key), value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.format_key(key)).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys(self.format_pattern(pattern)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = conn.del(keys).await?;
        Ok(removed.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(prefixed("prod:", "task:1"), "prod:task:1");
        assert_eq!(prefixed("prod:", "tasks:*"), "prod:tasks:*");
        assert_eq!(prefixed("", "tasks:stats"), "tasks:stats");
    }

    #[test]
    fn test_pattern_prefix_is_literal() {
        assert_eq!(escape_glob("prod:"), "prod:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
        assert_eq!(
            prefixed(&escape_glob("app[1]:"), "tasks:*"),
            "app\\[1\\]:tasks:*"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisCache::connect("not a url", "", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CacheError::Redis(_))));
    }
}
