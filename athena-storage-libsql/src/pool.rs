//! Pooled access to the libSQL database.
//!
//! Dynamic sizing comes from the core config formula; acquisition is
//! bounded by a semaphore plus timeout and guarded by the circuit breaker
//! so a dead backend fails fast instead of queueing work.

use athena_core::breaker::{BreakerConfig, CircuitBreaker};
use athena_core::error::{Error, Result};
use athena_core::types::DbConfig;
use libsql::{Connection, Database};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

struct IdleConn {
    conn: Connection,
    created_at: Instant,
    idle_since: Instant,
}

/// Pool health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub responsive: bool,
    pub pool_utilization: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connection pool with idle/lifetime recycling
pub struct DbPool {
    db: Arc<Database>,
    min: u32,
    max: u32,
    acquire_timeout: Duration,
    idle_recycle: Duration,
    lifetime_recycle: Duration,
    idle: Arc<Mutex<Vec<IdleConn>>>,
    permits: Arc<Semaphore>,
    in_use: Arc<AtomicU32>,
    breaker: Arc<CircuitBreaker>,
}

impl DbPool {
    /// Build a pool sized for the current worker count
    pub fn new(db: Arc<Database>, config: &DbConfig) -> Self {
        let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
        let (min, max) = config.pool_bounds(workers);
        info!("Database pool sized min={min} max={max} (workers={workers})");
        Self {
            db,
            min,
            max,
            acquire_timeout: Duration::from_millis(config.timeout_ms),
            idle_recycle: Duration::from_secs(config.idle_recycle_s),
            lifetime_recycle: Duration::from_secs(config.lifetime_recycle_s),
            idle: Arc::new(Mutex::new(Vec::new())),
            permits: Arc::new(Semaphore::new(max as usize)),
            in_use: Arc::new(AtomicU32::new(0)),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default())),
        }
    }

    /// Pre-open the minimum connection count
    pub async fn warm_up(&self) -> Result<()> {
        let mut idle = Vec::new();
        for _ in 0..self.min {
            let conn = self.open()?;
            idle.push(IdleConn {
                conn,
                created_at: Instant::now(),
                idle_since: Instant::now(),
            });
        }
        *self.idle.lock() = idle;
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| Error::Connection(e.to_string()))
    }

    /// Acquire a connection, failing with `BackendUnavailable` when the pool
    /// stays exhausted past the acquire timeout
    pub async fn acquire(&self) -> Result<PooledConn> {
        let permit = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(
                    self.acquire_timeout,
                    self.permits.clone().acquire_owned(),
                )
                .await
                {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(Error::BackendUnavailable("pool closed".into())),
                    Err(_) => Err(Error::BackendUnavailable(format!(
                        "pool exhausted after {:?}",
                        self.acquire_timeout
                    ))),
                }
            })
            .await?;

        let conn = self.checkout()?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConn {
            conn: Some(conn),
            permit: Some(permit),
            idle: self.idle.clone(),
            in_use: self.in_use.clone(),
            idle_recycle: self.idle_recycle,
            lifetime_recycle: self.lifetime_recycle,
        })
    }

    fn checkout(&self) -> Result<IdleConn> {
        let now = Instant::now();
        let mut idle = self.idle.lock();
        while let Some(candidate) = idle.pop() {
            let stale = now.duration_since(candidate.idle_since) > self.idle_recycle
                || now.duration_since(candidate.created_at) > self.lifetime_recycle;
            if stale {
                debug!("Recycling stale pooled connection");
                continue;
            }
            return Ok(candidate);
        }
        drop(idle);
        Ok(IdleConn {
            conn: self.open()?,
            created_at: now,
            idle_since: now,
        })
    }

    /// Current utilization in [0, 1]
    #[must_use]
    pub fn utilization(&self) -> f64 {
        f64::from(self.in_use.load(Ordering::Relaxed)) / f64::from(self.max)
    }

    /// Probe the backend with a trivial query
    pub async fn health(&self) -> PoolHealth {
        let utilization = self.utilization();
        match self.acquire().await {
            Ok(conn) => match conn.query("SELECT 1", ()).await {
                Ok(_) => PoolHealth {
                    responsive: true,
                    pool_utilization: utilization,
                    error: None,
                },
                Err(e) => PoolHealth {
                    responsive: false,
                    pool_utilization: utilization,
                    error: Some(e.to_string()),
                },
            },
            Err(e) => PoolHealth {
                responsive: false,
                pool_utilization: utilization,
                error: Some(e.to_string()),
            },
        }
    }
}

/// A checked-out connection; returns to the idle list on drop
pub struct PooledConn {
    conn: Option<IdleConn>,
    permit: Option<OwnedSemaphorePermit>,
    idle: Arc<Mutex<Vec<IdleConn>>>,
    in_use: Arc<AtomicU32>,
    idle_recycle: Duration,
    lifetime_recycle: Duration,
}

impl PooledConn {
    fn inner(&self) -> &Connection {
        // The option is only vacated in drop
        match &self.conn {
            Some(idle) => &idle.conn,
            None => unreachable!("connection taken before drop"),
        }
    }

    /// Execute a statement
    pub async fn execute(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<u64> {
        self.inner()
            .execute(sql, params)
            .await
            .map_err(crate::migrations::driver)
    }

    /// Run a query
    pub async fn query(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<libsql::Rows> {
        self.inner()
            .query(sql, params)
            .await
            .map_err(crate::migrations::driver)
    }

    /// Begin a transaction
    pub async fn transaction(&self) -> Result<libsql::Transaction> {
        self.inner()
            .transaction()
            .await
            .map_err(crate::migrations::driver)
    }

    /// Insert many rows into one table inside a single transaction.
    ///
    /// Column names come from trusted schema constants, never caller input.
    pub async fn batch_insert(
        &self,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<libsql::Value>>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        let tx = self.transaction().await?;
        let mut inserted = 0u64;
        for row in rows {
            inserted += tx
                .execute(&sql, libsql::params_from_iter(row))
                .await
                .map_err(crate::migrations::driver)?;
        }
        tx.commit().await.map_err(crate::migrations::driver)?;
        Ok(inserted)
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if let Some(mut idle_conn) = self.conn.take() {
            let now = Instant::now();
            let expired = now.duration_since(idle_conn.created_at) > self.lifetime_recycle
                || now.duration_since(idle_conn.idle_since) > self.idle_recycle;
            if !expired {
                idle_conn.idle_since = now;
                self.idle.lock().push(idle_conn);
            }
        }
        drop(self.permit.take());
    }
}
