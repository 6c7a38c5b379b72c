//! Redis connection pool backing the connection registry.
//!
//! Wraps a multiplexed connection with the circuit breaker so that a dead
//! Redis turns into fast `StorageUnavailable` errors instead of hung events.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitState, RedisHealth};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// Shared multiplexed Redis connection with circuit breaker protection.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    config: RedisConfig,
}

impl RedisPool {
    /// Create a new pool. No connection is made until first use.
    pub fn new(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<RedisHealth>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health,
            config,
        })
    }

    /// Get the shared connection, connecting lazily.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.config.url, "Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command, recording the outcome on the circuit breaker and
    /// dropping the cached connection when the failure was a broken socket.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    /// HSET the fields and, when `ttl_seconds > 0`, EXPIRE the key, in one
    /// MULTI/EXEC so readers never see the entry without its TTL.
    pub async fn put_hash(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<(), PoolError> {
        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(key, fields).ignore();
        if ttl_seconds > 0 {
            pipe.expire(key, ttl_seconds as i64).ignore();
        }

        self.execute(|mut conn| async move {
            let _: () = pipe.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    pub async fn del(&self, key: &str) -> Result<(), PoolError> {
        let key = key.to_string();
        self.execute(|mut conn| async move {
            let _: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Reset the TTL of `key`. Returns `false` if the key does not exist.
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool, PoolError> {
        let key = key.to_string();
        self.execute(|mut conn| async move {
            let set: i64 = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ttl_seconds)
                .query_async(&mut conn)
                .await?;
            Ok(set == 1)
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, PoolError> {
        let key = key.to_string();
        self.execute(|mut conn| async move {
            let count: i64 = redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PoolError> {
        let key = key.to_string();
        self.execute(|mut conn| async move {
            redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await
        })
        .await
    }

    /// One `SCAN cursor MATCH pattern COUNT count` page.
    /// Returns the next cursor (0 when the iteration is complete) and the keys.
    pub async fn scan_match(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), PoolError> {
        let pattern = pattern.to_string();
        self.execute(|mut conn| async move {
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Circuit closed and connection established
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn health(&self) -> &RedisHealth {
        &self.health
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}
