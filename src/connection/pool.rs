//! Read/write connection pool
//!
//! Readers and writers are separate sets of `ManagedConnection`s. Each
//! call picks the next member of its set by an atomically incremented
//! counter; members are independent, so callers on different members run
//! concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::error::ConnectionResult;
use super::managed::ManagedConnection;
use super::{QueryExecutor, TextRow};
use crate::config::{ConfigError, SettingsStore};

pub struct ConnectionPool {
    readers: Vec<Arc<ManagedConnection>>,
    writers: Vec<Arc<ManagedConnection>>,
    next_reader: AtomicUsize,
    next_writer: AtomicUsize,
}

impl ConnectionPool {
    /// Build the pool from the current settings. Connections open lazily.
    pub fn new(settings: &SettingsStore) -> Result<Self, ConfigError> {
        let current = settings.current();
        current.validate()?;

        let build = |n: usize| {
            (0..n)
                .map(|_| Arc::new(ManagedConnection::new(settings)))
                .collect::<Vec<_>>()
        };
        let pool = Self {
            readers: build(current.read_pool_size),
            writers: build(current.write_pool_size),
            next_reader: AtomicUsize::new(0),
            next_writer: AtomicUsize::new(0),
        };
        info!(
            readers = pool.readers.len(),
            writers = pool.writers.len(),
            "Connection pool created"
        );
        Ok(pool)
    }

    /// Next reader connection
    pub fn reader(&self) -> Arc<ManagedConnection> {
        pick(&self.readers, &self.next_reader)
    }

    /// Next writer connection
    pub fn writer(&self) -> Arc<ManagedConnection> {
        pick(&self.writers, &self.next_writer)
    }

    pub fn readers(&self) -> &[Arc<ManagedConnection>] {
        &self.readers
    }

    pub fn writers(&self) -> &[Arc<ManagedConnection>] {
        &self.writers
    }

    /// Close every member. Returns the first error after trying all of them.
    pub async fn close(&self) -> ConnectionResult<()> {
        let mut first_error = None;
        for conn in self.readers.iter().chain(self.writers.iter()) {
            if let Err(e) = conn.close().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn pick(members: &[Arc<ManagedConnection>], counter: &AtomicUsize) -> Arc<ManagedConnection> {
    let i = counter.fetch_add(1, Ordering::Relaxed) % members.len();
    Arc::clone(&members[i])
}

/// Row-returning statements go to a reader, everything else to a writer
#[async_trait]
impl QueryExecutor for ConnectionPool {
    async fn query_rows(&self, sql: &str) -> ConnectionResult<Vec<TextRow>> {
        self.reader().query_rows(sql).await
    }

    async fn execute(&self, sql: &str) -> ConnectionResult<u64> {
        self.writer().execute(sql).await
    }
}
