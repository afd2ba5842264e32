//! Storage drivers for the database adapter.

use super::postgres::PostgresJobStore;
use super::sqlite::SqliteJobStore;
use crate::config::{validate_table_name, ConnectionConfig};
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Persistence operations the database adapter needs from a SQL backend.
///
/// Statuses are stored as their lowercase names. A delayed job is stored as
/// `pending` with a future `process_after`; counting and listing report it
/// as `delayed`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Driver name.
    fn name(&self) -> &'static str;

    /// Create the jobs table and indexes if missing.
    async fn ensure_schema(&self) -> QueueResult<()>;

    /// Insert a new job; `cron` marks a recurring template.
    async fn insert(&self, job: &Job, cron: Option<&str>) -> QueueResult<()>;

    /// Atomically move up to `limit` eligible jobs to `processing`.
    ///
    /// Claimed jobs have their attempts incremented and `started_at` set, and
    /// come back in dequeue order.
    async fn claim(&self, queue: &str, limit: usize, now: DateTime<Utc>) -> QueueResult<Vec<Job>>;

    /// Point lookup.
    async fn get(&self, queue: &str, id: &JobId) -> QueueResult<Option<Job>>;

    /// Persist the mutable fields of an existing job. False if it is gone.
    async fn save(&self, job: &Job) -> QueueResult<bool>;

    /// Write only the caller-editable fields: data, options, priority and
    /// max attempts. With `reschedule`, `process_after` is also written, but
    /// only while the stored row is still `pending`. Status, attempts and
    /// outcome columns are left as stored. False if the job is gone.
    async fn update_fields(&self, job: &Job, reschedule: bool) -> QueueResult<bool>;

    /// Delete a job. False if absent.
    async fn delete(&self, queue: &str, id: &JobId) -> QueueResult<bool>;

    /// Per-status counts, with delayed jobs reported separately.
    async fn count_by_status(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Vec<(JobStatus, u64)>>;

    /// Delete every job of a queue, returning how many were removed.
    async fn clear(&self, queue: &str) -> QueueResult<u64>;

    /// Page through the jobs of one status, newest first.
    async fn list_by_status(
        &self,
        queue: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>>;

    /// Delete completed and failed jobs that finished before `cutoff`.
    async fn delete_finished_before(&self, queue: &str, cutoff: DateTime<Utc>) -> QueueResult<u64>;

    /// Close the connection pool.
    async fn close(&self);
}

/// Opens a [`JobStore`] for a connection and table name.
pub type DriverConnector = Arc<
    dyn Fn(ConnectionConfig, String) -> BoxFuture<'static, QueueResult<Arc<dyn JobStore>>>
        + Send
        + Sync,
>;

/// Maps `databaseType` names to driver connectors.
///
/// The built-in set covers `postgres` (alias `postgresql`) and `sqlite`;
/// callers may register their own.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverConnector>,
}

impl DriverRegistry {
    /// A registry with no drivers.
    pub fn empty() -> Self {
        Self {
            drivers: BTreeMap::new(),
        }
    }

    /// A registry with the built-in drivers.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::empty();
        let postgres: DriverConnector = Arc::new(connect_postgres);
        registry.register("postgres", Arc::clone(&postgres));
        registry.register("postgresql", postgres);
        registry.register("sqlite", Arc::new(connect_sqlite));
        registry
    }

    /// Register or replace a driver.
    pub fn register(&mut self, name: impl Into<String>, connector: DriverConnector) {
        self.drivers.insert(name.into().to_ascii_lowercase(), connector);
    }

    /// Whether a driver is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered driver names.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Open a store with the driver registered under `database_type`.
    pub async fn connect(
        &self,
        database_type: &str,
        connection: &ConnectionConfig,
        table: &str,
    ) -> QueueResult<Arc<dyn JobStore>> {
        validate_table_name(table)?;

        let connector = self
            .drivers
            .get(&database_type.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| QueueError::DriverUnavailable(database_type.to_string()))?;

        connector(connection.clone(), table.to_string()).await
    }
}

fn connect_postgres(
    connection: ConnectionConfig,
    table: String,
) -> BoxFuture<'static, QueueResult<Arc<dyn JobStore>>> {
    async move {
        let store = PostgresJobStore::connect(&connection, &table).await?;
        Ok(Arc::new(store) as Arc<dyn JobStore>)
    }
    .boxed()
}

fn connect_sqlite(
    connection: ConnectionConfig,
    table: String,
) -> BoxFuture<'static, QueueResult<Arc<dyn JobStore>>> {
    async move {
        let store = SqliteJobStore::connect(&connection, &table).await?;
        Ok(Arc::new(store) as Arc<dyn JobStore>)
    }
    .boxed()
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
