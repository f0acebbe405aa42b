//! A single lazily opened connection
//!
//! Every operation holds the connection lock for the whole of
//! "obtain or open, execute, read results", so concurrent callers on one
//! `ManagedConnection` queue behind each other.
//!
//! State machine:
//!
//! ```text
//! Unconnected -> Connecting -> Open
//! Open -> Broken (fatal error, abandoned operation, endpoint change)
//! Open -> Closed (close())
//! Broken | Closed -> Connecting (next access)
//! ```

use std::future::Future;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{ChangeUserOpts, Conn, Opts, Row};
use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::error::{ConnectionError, ConnectionResult};
use super::params::ParamValues;
use super::retry::RetryWithCooldown;
use super::{QueryExecutor, TextRow};
use crate::config::{ConnectionSettings, SettingsStore};
use crate::sql::SqlQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Open,
    Broken,
    Closed,
}

struct Slot {
    conn: Option<Conn>,
    /// Options the open connection currently runs with
    opts: Option<Opts>,
    updates: watch::Receiver<ConnectionSettings>,
    /// Set while a network operation runs; still set on the next access
    /// if that operation's future was dropped
    in_flight: bool,
}

/// One connection, opened on first use
pub struct ManagedConnection {
    slot: AsyncMutex<Slot>,
    state: Mutex<ConnectionState>,
    opener: RetryWithCooldown,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("state", &self.state())
            .finish()
    }
}

impl ManagedConnection {
    /// Create an unconnected wrapper. No network I/O happens here.
    pub fn new(settings: &SettingsStore) -> Self {
        let updates = settings.subscribe();
        let cooldown = updates.borrow().open_retry_cooldown;
        Self {
            slot: AsyncMutex::new(Slot {
                conn: None,
                opts: None,
                updates,
                in_flight: false,
            }),
            state: Mutex::new(ConnectionState::Unconnected),
            opener: RetryWithCooldown::new(cooldown),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Open the connection now instead of on first use
    pub async fn connect(&self) -> ConnectionResult<()> {
        let mut slot = self.slot.lock().await;
        self.ready(&mut slot).await?;
        slot.in_flight = false;
        Ok(())
    }

    /// Disconnect. The next operation reconnects.
    pub async fn close(&self) -> ConnectionResult<()> {
        let mut slot = self.slot.lock().await;
        slot.opts = None;
        slot.in_flight = false;
        let conn = slot.conn.take();
        self.set_state(ConnectionState::Closed);
        if let Some(conn) = conn {
            conn.disconnect().await.map_err(ConnectionError::from_driver)?;
            info!("Connection closed");
        }
        Ok(())
    }

    /// Apply a pending connection string change without running a statement
    pub async fn retarget(&self) -> ConnectionResult<()> {
        let mut slot = self.slot.lock().await;
        self.apply_settings(&mut slot).await
    }

    /// Run a statement that returns rows
    pub async fn query_rows(&self, sql: &str) -> ConnectionResult<Vec<TextRow>> {
        let mut slot = self.slot.lock().await;
        let conn = self.ready(&mut slot).await?;
        let result: mysql_async::Result<Vec<Row>> = conn.query(sql).await;
        let rows = self.settle(&mut slot, result)?;
        Ok(rows.into_iter().map(TextRow::from_row).collect())
    }

    /// Run a statement that returns no rows; yields the affected row count
    pub async fn execute(&self, sql: &str) -> ConnectionResult<u64> {
        let mut slot = self.slot.lock().await;
        let conn = self.ready(&mut slot).await?;
        let result = match conn.query_drop(sql).await {
            Ok(()) => Ok(conn.affected_rows()),
            Err(e) => Err(e),
        };
        self.settle(&mut slot, result)
    }

    /// Run a compiled query with bound values, returning rows
    pub async fn exec_query(
        &self,
        query: &SqlQuery,
        values: &ParamValues,
    ) -> ConnectionResult<Vec<TextRow>> {
        let (text, params) = values.bind(query)?;
        let mut slot = self.slot.lock().await;
        let conn = self.ready(&mut slot).await?;
        let result: mysql_async::Result<Vec<Row>> = conn.exec(text.as_str(), params).await;
        let rows = self.settle(&mut slot, result)?;
        Ok(rows.into_iter().map(TextRow::from_row).collect())
    }

    /// Run a compiled statement with bound values; yields the affected row count
    pub async fn exec_statement(
        &self,
        query: &SqlQuery,
        values: &ParamValues,
    ) -> ConnectionResult<u64> {
        let (text, params) = values.bind(query)?;
        let mut slot = self.slot.lock().await;
        let conn = self.ready(&mut slot).await?;
        let result = match conn.exec_drop(text.as_str(), params).await {
            Ok(()) => Ok(conn.affected_rows()),
            Err(e) => Err(e),
        };
        self.settle(&mut slot, result)
    }

    /// `query_rows`, abandoned when `cancel` completes first
    pub async fn query_rows_until(
        &self,
        sql: &str,
        cancel: impl Future<Output = ()>,
    ) -> ConnectionResult<Vec<TextRow>> {
        until(self.query_rows(sql), cancel).await
    }

    /// `execute`, abandoned when `cancel` completes first
    pub async fn execute_until(
        &self,
        sql: &str,
        cancel: impl Future<Output = ()>,
    ) -> ConnectionResult<u64> {
        until(self.execute(sql), cancel).await
    }

    /// `exec_query`, abandoned when `cancel` completes first
    pub async fn exec_query_until(
        &self,
        query: &SqlQuery,
        values: &ParamValues,
        cancel: impl Future<Output = ()>,
    ) -> ConnectionResult<Vec<TextRow>> {
        until(self.exec_query(query, values), cancel).await
    }

    /// Re-target if the settings changed, then open the connection if needed
    async fn ready<'s>(&self, slot: &'s mut Slot) -> ConnectionResult<&'s mut Conn> {
        if slot.in_flight {
            slot.in_flight = false;
            if slot.conn.take().is_some() {
                debug!("Discarding connection abandoned mid-operation");
                slot.opts = None;
                self.set_state(ConnectionState::Broken);
            }
        }

        self.apply_settings(slot).await?;

        if slot.conn.is_none() {
            let previous = self.state();
            let settings = slot.updates.borrow().clone();
            self.set_state(ConnectionState::Connecting);

            match self.opener.run(|| open(settings.connection_string)).await {
                Ok((conn, opts)) => {
                    slot.conn = Some(conn);
                    slot.opts = Some(opts);
                    self.set_state(ConnectionState::Open);
                }
                Err(e) => {
                    self.set_state(previous);
                    return Err(e);
                }
            }
        }

        slot.in_flight = true;
        let state = self.state();
        slot.conn.as_mut().ok_or_else(|| {
            ConnectionError::InvalidConnectionString(format!("no connection in state {:?}", state))
        })
    }

    /// Switch an open connection to the latest connection string.
    ///
    /// Same endpoint: change user and default database in place.
    /// Different endpoint: drop the connection; the next access opens a new one.
    async fn apply_settings(&self, slot: &mut Slot) -> ConnectionResult<()> {
        if !slot.updates.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let settings = slot.updates.borrow_and_update().clone();

        let (Some(conn), Some(current)) = (slot.conn.as_mut(), slot.opts.as_ref()) else {
            return Ok(());
        };
        let next = parse_opts(&settings.connection_string)?;

        if same_endpoint(current, &next) {
            let change = ChangeUserOpts::default()
                .with_user(next.user().map(str::to_string))
                .with_pass(next.pass().map(str::to_string))
                .with_db_name(next.db_name().map(str::to_string));

            slot.in_flight = true;
            let result = conn.change_user(change).await;
            self.settle(slot, result)?;
            debug!(user = ?next.user(), db = ?next.db_name(), "Re-targeted open connection");
            slot.opts = Some(next);
        } else {
            debug!(host = %next.ip_or_hostname(), "Connection endpoint changed, replacing connection");
            slot.opts = None;
            if let Some(conn) = slot.conn.take() {
                self.set_state(ConnectionState::Broken);
                if let Err(e) = conn.disconnect().await {
                    debug!(error = %e, "Disconnect of replaced connection failed");
                }
            }
        }
        Ok(())
    }

    /// Clear the in-flight mark and discard the connection on fatal errors
    fn settle<T>(&self, slot: &mut Slot, result: mysql_async::Result<T>) -> ConnectionResult<T> {
        slot.in_flight = false;
        result.map_err(|e| {
            let err = ConnectionError::from_driver(e);
            if err.is_fatal() {
                warn!(error = %err, "Fatal connection error, discarding connection");
                slot.conn = None;
                slot.opts = None;
                self.set_state(ConnectionState::Broken);
            }
            err
        })
    }
}

#[async_trait]
impl QueryExecutor for ManagedConnection {
    async fn query_rows(&self, sql: &str) -> ConnectionResult<Vec<TextRow>> {
        ManagedConnection::query_rows(self, sql).await
    }

    async fn execute(&self, sql: &str) -> ConnectionResult<u64> {
        ManagedConnection::execute(self, sql).await
    }
}

pub(crate) fn parse_opts(connection_string: &str) -> ConnectionResult<Opts> {
    Opts::from_url(connection_string)
        .map_err(|e| ConnectionError::InvalidConnectionString(e.to_string()))
}

fn same_endpoint(a: &Opts, b: &Opts) -> bool {
    a.ip_or_hostname() == b.ip_or_hostname()
        && a.tcp_port() == b.tcp_port()
        && a.socket() == b.socket()
}

async fn open(connection_string: String) -> ConnectionResult<(Conn, Opts)> {
    let opts = parse_opts(&connection_string)?;
    match Conn::new(opts.clone()).await {
        Ok(conn) => {
            info!(
                host = %opts.ip_or_hostname(),
                port = opts.tcp_port(),
                db = ?opts.db_name(),
                "Connection opened"
            );
            Ok((conn, opts))
        }
        Err(e) => {
            warn!(
                host = %opts.ip_or_hostname(),
                port = opts.tcp_port(),
                error = %e,
                "Failed to open connection"
            );
            Err(ConnectionError::Open(std::sync::Arc::new(e)))
        }
    }
}

/// Race `op` against `cancel`. A dropped `op` leaves its connection marked
/// in flight, so it is discarded on next access.
async fn until<T>(
    op: impl Future<Output = ConnectionResult<T>>,
    cancel: impl Future<Output = ()>,
) -> ConnectionResult<T> {
    tokio::select! {
        result = op => result,
        _ = cancel => {
            debug!("Operation cancelled");
            Err(ConnectionError::Cancelled)
        }
    }
}
