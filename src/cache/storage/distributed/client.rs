//! Key/Value Wire Clients
//!
//! The subset of the Redis command set the distributed backend relies on
//! (GET, SETEX, SET XX, DEL, KEYS, SADD, EXPIRE, SMEMBERS, PING), expressed
//! as a trait so the wire client is a pluggable dependency.

use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use redis::aio::ConnectionManager;
use redis::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Client Traits
// =============================================================================

/// A connection to one key/value node
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Endpoint this client talks to
    fn endpoint(&self) -> &str;

    /// GET
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// SETEX (TTL in whole seconds)
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;

    /// SET .. XX EX: overwrite a key only while it is live; returns whether
    /// anything was written
    async fn set_xx(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool>;

    /// DEL; returns the number of keys removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// KEYS with a Redis glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// SADD
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// EXPIRE NX + EXPIRE GT: give a key an expiry of at least `ttl_secs`
    /// from now, never shortening an existing one
    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// SMEMBERS
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// PING
    async fn ping(&self) -> Result<()>;

    /// Release the connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory producing clients for node endpoints
#[async_trait]
pub trait KvConnector: Send + Sync {
    /// Open a client for an endpoint
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn KvClient>>;
}

/// Escape Redis glob metacharacters in a literal
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// Redis Connector
// =============================================================================

/// Connects to Redis nodes with exponential backoff on transient failures
#[derive(Debug, Clone)]
pub struct RedisConnector {
    /// First retry delay
    pub initial_interval: Duration,
    /// Give up after this long
    pub max_elapsed: Duration,
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl KvConnector for RedisConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn KvClient>> {
        let client = Client::open(endpoint)
            .map_err(|e| Error::distributed("connect", Some(endpoint), e.to_string()))?;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        let connection = backoff::future::retry(policy, || async {
            ConnectionManager::new(client.clone()).await.map_err(|e| {
                let err = Error::from(e);
                if err.is_transient() {
                    debug!(endpoint = %endpoint, error = %err, "Redis connect failed, retrying");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await
        .map_err(|e| {
            warn!(endpoint = %endpoint, error = %e, "Redis connect failed");
            Error::distributed("connect", Some(endpoint), e.to_string())
        })?;

        info!(endpoint = %endpoint, "Connected to Redis node");
        Ok(Arc::new(RedisKvClient {
            endpoint: endpoint.to_string(),
            connection,
        }))
    }
}

/// Client for a single Redis node
pub struct RedisKvClient {
    endpoint: String,
    connection: ConnectionManager,
}

impl RedisKvClient {
    fn wire_error(&self, operation: &str, e: redis::RedisError) -> Error {
        Error::distributed(operation, Some(&self.endpoint), e.to_string())
    }
}

#[async_trait]
impl KvClient for RedisKvClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("get", e))?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("setex", e))?;
        Ok(())
    }

    async fn set_xx(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let written: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("set", e))?;
        Ok(written.is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("del", e))?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("keys", e))?;
        Ok(keys)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("sadd", e))?;
        Ok(())
    }

    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<()> {
        // NX/GT flags need Redis 7
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .arg("NX")
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .arg("GT")
            .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("expire", e))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("smembers", e))?;
        Ok(members)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.wire_error("ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("cache:"), "cache:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[tokio::test]
    async fn test_invalid_url_is_distributed_error() {
        let connector = RedisConnector::default();
        let err = connector.connect("not a url").await.err().unwrap();
        assert!(err.is_connectivity());
    }
}
