//! SQLite job store.

use super::driver::JobStore;
use super::row::{into_jobs, to_millis, JobParams, JobRow, COLUMNS};
use crate::config::{validate_table_name, ConnectionConfig};
use crate::error::QueueResult;
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Job store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteJobStore {
    /// Open a pool for `connection` and bind it to `table`.
    ///
    /// In-memory databases are pinned to a single long-lived connection,
    /// since every new connection would see an empty database.
    pub async fn connect(connection: &ConnectionConfig, table: &str) -> QueueResult<Self> {
        validate_table_name(table)?;

        let in_memory = connection.url.contains(":memory:") || connection.url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(&connection.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = SqlitePoolOptions::new().acquire_timeout(connection.connect_timeout());
        let pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(connection.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(table = %table, in_memory, "SQLite job store connected");

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool, table: &str) -> QueueResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_schema(&self) -> QueueResult<()> {
        let table = &self.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    queue TEXT NOT NULL,
                    data TEXT NOT NULL,
                    options TEXT NOT NULL,
                    status TEXT NOT NULL,
                    priority INTEGER NOT NULL DEFAULT 0,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL DEFAULT 3,
                    result TEXT,
                    error TEXT,
                    created_at INTEGER NOT NULL,
                    process_after INTEGER NOT NULL,
                    started_at INTEGER,
                    completed_at INTEGER,
                    failed_at INTEGER,
                    cron TEXT
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_dequeue_idx \
                 ON {table} (queue, status, priority DESC, process_after)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_created_idx ON {table} (queue, created_at)"),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(table = %table, "SQLite schema ready");
        Ok(())
    }

    async fn insert(&self, job: &Job, cron: Option<&str>) -> QueueResult<()> {
        let p = JobParams::from_job(job)?;
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}, cron) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        sqlx::query(&sql)
            .bind(p.id)
            .bind(p.queue)
            .bind(p.data)
            .bind(p.options)
            .bind(p.status)
            .bind(p.priority)
            .bind(p.attempts)
            .bind(p.max_attempts)
            .bind(p.result)
            .bind(p.error)
            .bind(p.created_at)
            .bind(p.process_after)
            .bind(p.started_at)
            .bind(p.completed_at)
            .bind(p.failed_at)
            .bind(cron)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim(&self, queue: &str, limit: usize, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let now_ms = to_millis(now);
        let sql = format!(
            "UPDATE {table} SET status = 'processing', attempts = attempts + 1, started_at = ? \
             WHERE id IN (\
                 SELECT id FROM {table} \
                 WHERE queue = ? AND status = 'pending' AND process_after <= ? \
                 ORDER BY priority DESC, created_at ASC, rowid ASC \
                 LIMIT ?\
             ) RETURNING {COLUMNS}",
            table = self.table
        );

        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(now_ms)
            .bind(queue)
            .bind(now_ms)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = into_jobs(rows, now)?;
        jobs.sort_by(Job::dequeue_cmp);
        Ok(jobs)
    }

    async fn get(&self, queue: &str, id: &JobId) -> QueueResult<Option<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE queue = ? AND id = ?",
            self.table
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(queue)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.into_job(Utc::now())).transpose()
    }

    async fn save(&self, job: &Job) -> QueueResult<bool> {
        let p = JobParams::from_job(job)?;
        let sql = format!(
            "UPDATE {} SET data = ?, options = ?, status = ?, priority = ?, attempts = ?, \
             max_attempts = ?, result = ?, error = ?, process_after = ?, started_at = ?, \
             completed_at = ?, failed_at = ? \
             WHERE queue = ? AND id = ?",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(p.data)
            .bind(p.options)
            .bind(p.status)
            .bind(p.priority)
            .bind(p.attempts)
            .bind(p.max_attempts)
            .bind(p.result)
            .bind(p.error)
            .bind(p.process_after)
            .bind(p.started_at)
            .bind(p.completed_at)
            .bind(p.failed_at)
            .bind(p.queue)
            .bind(p.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_fields(&self, job: &Job, reschedule: bool) -> QueueResult<bool> {
        let p = JobParams::from_job(job)?;
        let sql = format!(
            "UPDATE {} SET data = ?, options = ?, priority = ?, max_attempts = ?, \
             process_after = CASE WHEN ? AND status = 'pending' THEN ? ELSE process_after END \
             WHERE queue = ? AND id = ?",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(p.data)
            .bind(p.options)
            .bind(p.priority)
            .bind(p.max_attempts)
            .bind(reschedule)
            .bind(p.process_after)
            .bind(p.queue)
            .bind(p.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        let sql = format!("DELETE FROM {} WHERE queue = ? AND id = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(queue)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Vec<(JobStatus, u64)>> {
        let sql = format!(
            "SELECT CASE WHEN status = 'pending' AND process_after > ? THEN 'delayed' ELSE status END AS bucket, \
             COUNT(*) AS total FROM {} WHERE queue = ? GROUP BY bucket",
            self.table
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(to_millis(now))
            .bind(queue)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(status, total)| -> QueueResult<(JobStatus, u64)> {
                Ok((status.parse()?, u64::try_from(total).unwrap_or(0)))
            })
            .collect()
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let sql = format!("DELETE FROM {} WHERE queue = ?", self.table);
        let result = sqlx::query(&sql).bind(queue).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn list_by_status(
        &self,
        queue: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        let filter = match status {
            JobStatus::Pending => "status = 'pending' AND process_after <= ?",
            JobStatus::Delayed => "status = 'pending' AND process_after > ?",
            _ => "status = ?",
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE queue = ? AND {filter} \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            self.table
        );

        let query = sqlx::query_as::<_, JobRow>(&sql).bind(queue);
        let query = match status {
            JobStatus::Pending | JobStatus::Delayed => query.bind(to_millis(now)),
            other => query.bind(other.as_str()),
        };
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        into_jobs(rows, now)
    }

    async fn delete_finished_before(&self, queue: &str, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let cutoff = to_millis(cutoff);
        let sql = format!(
            "DELETE FROM {} WHERE queue = ? AND (\
                 (status = 'completed' AND completed_at < ?) OR \
                 (status = 'failed' AND failed_at < ?)\
             )",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(queue)
            .bind(cutoff)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(table = %self.table, "SQLite job store closed");
    }
}
