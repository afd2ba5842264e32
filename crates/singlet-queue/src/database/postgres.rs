//! PostgreSQL job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several processes can poll the
//! same table without handing a job out twice.

use super::driver::JobStore;
use super::row::{into_jobs, to_millis, JobParams, JobRow, COLUMNS};
use crate::config::{validate_table_name, ConnectionConfig};
use crate::error::QueueResult;
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Job store backed by a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    table: String,
}

impl PostgresJobStore {
    /// Open a pool for `connection` and bind it to `table`.
    pub async fn connect(connection: &ConnectionConfig, table: &str) -> QueueResult<Self> {
        validate_table_name(table)?;

        let pool = PgPoolOptions::new()
            .max_connections(connection.max_connections)
            .acquire_timeout(connection.connect_timeout())
            .connect(&connection.url)
            .await?;

        info!(
            table = %table,
            max_connections = connection.max_connections,
            "PostgreSQL job store connected"
        );

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, table: &str) -> QueueResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> QueueResult<()> {
        let table = &self.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    seq BIGSERIAL,
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
                    created_at BIGINT NOT NULL,
                    process_after BIGINT NOT NULL,
                    started_at BIGINT,
                    completed_at BIGINT,
                    failed_at BIGINT,
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
        debug!(table = %table, "PostgreSQL schema ready");
        Ok(())
    }

    async fn insert(&self, job: &Job, cron: Option<&str>) -> QueueResult<()> {
        let p = JobParams::from_job(job)?;
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}, cron) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
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
        let sql = format!(
            "UPDATE {table} SET status = 'processing', attempts = attempts + 1, started_at = $3 \
             WHERE id IN (\
                 SELECT id FROM {table} \
                 WHERE queue = $1 AND status = 'pending' AND process_after <= $3 \
                 ORDER BY priority DESC, created_at ASC, seq ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED\
             ) RETURNING {COLUMNS}",
            table = self.table
        );

        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(queue)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(to_millis(now))
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = into_jobs(rows, now)?;
        jobs.sort_by(Job::dequeue_cmp);
        Ok(jobs)
    }

    async fn get(&self, queue: &str, id: &JobId) -> QueueResult<Option<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE queue = $1 AND id = $2",
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
            "UPDATE {} SET data = $1, options = $2, status = $3, priority = $4, attempts = $5, \
             max_attempts = $6, result = $7, error = $8, process_after = $9, started_at = $10, \
             completed_at = $11, failed_at = $12 \
             WHERE queue = $13 AND id = $14",
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
            "UPDATE {} SET data = $1, options = $2, priority = $3, max_attempts = $4, \
             process_after = CASE WHEN $5 AND status = 'pending' THEN $6 ELSE process_after END \
             WHERE queue = $7 AND id = $8",
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
        let sql = format!("DELETE FROM {} WHERE queue = $1 AND id = $2", self.table);
        let result = sqlx::query(&sql)
            .bind(queue)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Vec<(JobStatus, u64)>> {
        let sql = format!(
            "SELECT CASE WHEN status = 'pending' AND process_after > $2 THEN 'delayed' ELSE status END AS bucket, \
             COUNT(*) AS total FROM {} WHERE queue = $1 GROUP BY bucket",
            self.table
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(queue)
            .bind(to_millis(now))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(status, total)| -> QueueResult<(JobStatus, u64)> {
                Ok((status.parse()?, u64::try_from(total).unwrap_or(0)))
            })
            .collect()
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let sql = format!("DELETE FROM {} WHERE queue = $1", self.table);
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
            JobStatus::Pending => "status = 'pending' AND process_after <= $2",
            JobStatus::Delayed => "status = 'pending' AND process_after > $2",
            _ => "status = $2",
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE queue = $1 AND {filter} \
             ORDER BY created_at DESC, seq DESC LIMIT $3 OFFSET $4",
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
        let sql = format!(
            "DELETE FROM {} WHERE queue = $1 AND (\
                 (status = 'completed' AND completed_at < $2) OR \
                 (status = 'failed' AND failed_at < $2)\
             )",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(queue)
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(table = %self.table, "PostgreSQL job store closed");
    }
}
