//! Singlet Queue - Pluggable Job Queue
//!
//! One job-queue interface with three interchangeable backends:
//! - `memory`: in-process, timers for delays, nothing persisted
//! - `database`: a SQL table polled by the adapter (PostgreSQL, SQLite)
//! - `redis`: Bull-style keys with sorted sets for waiting and delayed jobs
//!
//! Every backend supports priorities, delayed jobs, retries with backoff,
//! per-queue concurrency and removal of finished jobs.
//!
//! # Architecture
//!
//! ```text
//!        QueueManager ──► AdapterHandle ──► dyn QueueAdapter
//!                                              │
//!              ┌───────────────────────────────┼────────────────────────┐
//!              ▼                               ▼                        ▼
//!        MemoryAdapter                  DatabaseAdapter            RedisAdapter
//!     (map + delay timers)        (poller + JobStore drivers)   (per-queue workers)
//!              │                               │                        │
//!              └───────────── Processor (spawned, info_span "job") ─────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use singlet_queue::prelude::*;
//! use serde_json::json;
//!
//! let manager = QueueManager::new();
//! let queue = manager.init_queue(AdapterKind::Memory, &QueueConfig::default()).await?;
//!
//! queue
//!     .process_jobs(
//!         "emails",
//!         processor(|job| async move {
//!             send_email(&job.data).await?;
//!             Ok(json!({ "sent": true }))
//!         }),
//!         ProcessOptions::with_concurrency(4),
//!     )
//!     .await?;
//!
//! queue
//!     .add_job("emails", json!({ "to": "user@example.com" }), JobOptions::new().with_priority(5))
//!     .await?;
//! ```

pub mod adapter;
pub mod backoff;
pub mod config;
pub mod database;
pub mod error;
pub mod job;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod redis;

pub use adapter::{processor, BoxError, ProcessOptions, Processor, ProcessorResult, QueueAdapter, QueueInfo};
pub use backoff::{backoff_delay, backoff_delay_ms, BackoffKind, BackoffOptions};
pub use config::{
    AdapterKind, ConnectionConfig, DatabaseAdapterConfig, QueueConfig, RedisAdapterConfig, RedisConnection,
};
pub use database::{DatabaseAdapter, DriverRegistry, JobStore, ProcessingMetrics};
pub use error::{QueueError, QueueResult};
pub use job::{FailureOutcome, Job, JobId, JobOptions, JobReceipt, JobStatus, JobUpdate, UpdateEffect};
pub use manager::{create_adapter, AdapterHandle, QueueManager};
pub use memory::MemoryAdapter;
pub use metrics::{register_metrics, JobMetrics};
pub use redis::{RedisAdapter, RedisKeys};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::adapter::{processor, ProcessOptions, QueueAdapter};
    pub use crate::config::{AdapterKind, QueueConfig};
    pub use crate::job::{Job, JobId, JobOptions, JobStatus, JobUpdate};
    pub use crate::manager::{AdapterHandle, QueueManager};
    pub use crate::{QueueError, QueueResult};
}
