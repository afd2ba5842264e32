//! Adapter factory and the manager holding the active adapter.

use crate::adapter::QueueAdapter;
use crate::config::{AdapterKind, QueueConfig};
use crate::database::DatabaseAdapter;
use crate::error::{QueueError, QueueResult};
use crate::memory::MemoryAdapter;
use crate::redis::RedisAdapter;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A constructed adapter of any kind.
#[derive(Clone)]
pub enum AdapterHandle {
    /// In-process adapter.
    Memory(Arc<MemoryAdapter>),
    /// SQL adapter.
    Database(Arc<DatabaseAdapter>),
    /// Redis adapter.
    Redis(Arc<RedisAdapter>),
}

impl AdapterHandle {
    /// Backend kind.
    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterHandle::Memory(_) => AdapterKind::Memory,
            AdapterHandle::Database(_) => AdapterKind::Database,
            AdapterHandle::Redis(_) => AdapterKind::Redis,
        }
    }

    /// The portable interface.
    pub fn as_adapter(&self) -> Arc<dyn QueueAdapter> {
        match self {
            AdapterHandle::Memory(a) => Arc::clone(a) as Arc<dyn QueueAdapter>,
            AdapterHandle::Database(a) => Arc::clone(a) as Arc<dyn QueueAdapter>,
            AdapterHandle::Redis(a) => Arc::clone(a) as Arc<dyn QueueAdapter>,
        }
    }

    /// The memory adapter, if that is the active kind.
    pub fn as_memory(&self) -> Option<&MemoryAdapter> {
        match self {
            AdapterHandle::Memory(a) => Some(a),
            _ => None,
        }
    }

    /// The database adapter and its extensions.
    pub fn as_database(&self) -> Option<&DatabaseAdapter> {
        match self {
            AdapterHandle::Database(a) => Some(a),
            _ => None,
        }
    }

    /// The Redis adapter and its extensions.
    pub fn as_redis(&self) -> Option<&RedisAdapter> {
        match self {
            AdapterHandle::Redis(a) => Some(a),
            _ => None,
        }
    }
}

impl Deref for AdapterHandle {
    type Target = dyn QueueAdapter;

    fn deref(&self) -> &Self::Target {
        match self {
            AdapterHandle::Memory(a) => a.as_ref(),
            AdapterHandle::Database(a) => a.as_ref(),
            AdapterHandle::Redis(a) => a.as_ref(),
        }
    }
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AdapterHandle").field(&self.kind()).finish()
    }
}

/// Build an adapter of the given kind. The adapter is not initialized.
pub fn create_adapter(kind: AdapterKind, config: &QueueConfig) -> AdapterHandle {
    match kind {
        AdapterKind::Memory => AdapterHandle::Memory(Arc::new(MemoryAdapter::from_config(config))),
        AdapterKind::Database => {
            AdapterHandle::Database(Arc::new(DatabaseAdapter::from_config(config)))
        }
        AdapterKind::Redis => AdapterHandle::Redis(Arc::new(RedisAdapter::from_config(config))),
    }
}

/// Holds at most one active adapter.
#[derive(Default)]
pub struct QueueManager {
    active: Mutex<Option<AdapterHandle>>,
}

impl QueueManager {
    /// Creates a manager with no active adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build, initialize and store an adapter of `kind`.
    pub async fn init_queue(&self, kind: AdapterKind, config: &QueueConfig) -> QueueResult<AdapterHandle> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(QueueError::AlreadyInitialized);
        }

        config.validate()?;
        let handle = create_adapter(kind, config);
        handle.initialize().await?;

        info!(adapter = %kind, "Queue initialized");
        *active = Some(handle.clone());
        Ok(handle)
    }

    /// [`init_queue`](Self::init_queue) with the kind named in `config`.
    pub async fn init_from_config(&self, config: &QueueConfig) -> QueueResult<AdapterHandle> {
        self.init_queue(config.adapter, config).await
    }

    /// The active adapter.
    pub async fn get_queue(&self) -> QueueResult<AdapterHandle> {
        self.active.lock().await.clone().ok_or(QueueError::NotInitialized)
    }

    /// Whether an adapter is active.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Stop and forget the active adapter. No-op when none is active.
    pub async fn close_queue(&self) -> QueueResult<()> {
        let mut active = self.active.lock().await;
        let Some(handle) = active.take() else {
            return Ok(());
        };

        let kind = handle.kind();
        if let Err(e) = handle.stop().await {
            // keep the adapter so the caller can retry
            *active = Some(handle);
            return Err(e);
        }
        info!(adapter = %kind, "Queue closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_queue_before_init() {
        let manager = QueueManager::new();
        assert!(matches!(manager.get_queue().await, Err(QueueError::NotInitialized)));
        assert!(!manager.is_active().await);
    }

    #[tokio::test]
    async fn test_init_and_close() {
        let manager = QueueManager::new();
        let handle = manager
            .init_queue(AdapterKind::Memory, &QueueConfig::default())
            .await
            .unwrap();

        assert_eq!(handle.kind(), AdapterKind::Memory);
        assert!(handle.is_initialized());
        assert!(handle.as_memory().is_some());
        assert!(handle.as_database().is_none());

        let receipt = manager
            .get_queue()
            .await
            .unwrap()
            .add_job("emails", json!({"to": "x"}), JobOptions::new())
            .await
            .unwrap();
        assert_eq!(receipt.queue, "emails");

        manager.close_queue().await.unwrap();
        assert!(!handle.is_initialized());
        assert!(matches!(manager.get_queue().await, Err(QueueError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_double_init_rejected() {
        let manager = QueueManager::new();
        let config = QueueConfig::default();
        manager.init_queue(AdapterKind::Memory, &config).await.unwrap();

        let second = manager.init_queue(AdapterKind::Memory, &config).await;
        assert!(matches!(second, Err(QueueError::AlreadyInitialized)));

        manager.close_queue().await.unwrap();
        assert!(manager.init_queue(AdapterKind::Memory, &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_without_init_is_noop() {
        let manager = QueueManager::new();
        assert!(manager.close_queue().await.is_ok());
    }

    #[tokio::test]
    async fn test_init_from_config_uses_adapter_kind() {
        let mut config = QueueConfig::default();
        config.adapter = AdapterKind::Database;
        config.database.connection.url = "sqlite::memory:".to_string();

        let manager = QueueManager::new();
        let handle = manager.init_from_config(&config).await.unwrap();
        assert_eq!(handle.kind(), AdapterKind::Database);
        assert!(handle.as_database().is_some());

        manager.close_queue().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_init_leaves_manager_empty() {
        let mut config = QueueConfig::default();
        config.database.database_type = "oracle".to_string();

        let manager = QueueManager::new();
        let result = manager.init_queue(AdapterKind::Database, &config).await;
        assert!(matches!(result, Err(QueueError::DriverUnavailable(_))));
        assert!(!manager.is_active().await);
    }

    #[test]
    fn test_create_adapter_is_uninitialized() {
        let handle = create_adapter(AdapterKind::Redis, &QueueConfig::default());
        assert_eq!(handle.kind(), AdapterKind::Redis);
        assert!(!handle.is_initialized());
        assert!(handle.as_redis().is_some());
    }
}
