//! Integration tests for ConfigLoader.
//!
//! Each test writes its own config directory and uses its own environment
//! variable prefix so tests can run in parallel.

use singlet_config::{AppConfig, ConfigLoader};
use singlet_queue::AdapterKind;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).expect("Failed to write config file");
}

fn dir_str(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_layers_override_in_order() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "default.toml",
        r#"
        [queue]
        adapter = "database"

        [queue.database]
        table_name = "default_jobs"
        poll_interval_ms = 500
        "#,
    );
    write(
        &dir,
        "local.toml",
        r#"
        [queue.database]
        table_name = "local_jobs"
        "#,
    );

    let loader = ConfigLoader::with_env_prefix(dir_str(&dir), "SINGLET_LAYERS").unwrap();
    let config = loader.get().await;

    assert_eq!(config.queue.adapter, AdapterKind::Database);
    assert_eq!(config.queue.database.table_name, "local_jobs");
    assert_eq!(config.queue.database.poll_interval_ms, 500);
}

#[tokio::test]
async fn test_environment_file_and_variables() {
    let dir = TempDir::new().unwrap();
    write(&dir, "default.toml", "[queue]\nadapter = \"memory\"\n");
    write(&dir, "staging.toml", "[queue.redis]\nprefix = \"staging\"\n");

    std::env::set_var("SINGLET_ENVTEST_ENVIRONMENT", "staging");
    std::env::set_var("SINGLET_ENVTEST_QUEUE__ADAPTER", "redis");
    std::env::set_var("SINGLET_ENVTEST_QUEUE__REDIS__POOL_SIZE", "4");

    let loader = ConfigLoader::with_env_prefix(dir_str(&dir), "SINGLET_ENVTEST").unwrap();
    let config = loader.get().await;

    assert_eq!(config.queue.adapter, AdapterKind::Redis);
    assert_eq!(config.queue.redis.prefix, "staging");
    assert_eq!(config.queue.redis.pool_size, 4);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    write(&dir, "default.toml", "[queue.database]\npoll_interval_ms = 0\n");

    let result = ConfigLoader::with_env_prefix(dir_str(&dir), "SINGLET_INVALID");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_reload_and_get_value() {
    let dir = TempDir::new().unwrap();
    write(&dir, "default.toml", "[queue.database]\ntable_name = \"first\"\n");

    let loader = ConfigLoader::with_env_prefix(dir_str(&dir), "SINGLET_RELOAD").unwrap();
    assert_eq!(
        loader.get_value::<String>("queue.database.table_name").await.as_deref(),
        Some("first")
    );

    write(&dir, "default.toml", "[queue.database]\ntable_name = \"second\"\n");
    loader.reload().await.unwrap();
    assert_eq!(
        loader.get_value::<String>("queue.database.table_name").await.as_deref(),
        Some("second")
    );

    write(&dir, "default.toml", "[queue.database]\ntable_name = \"bad name\"\n");
    assert!(loader.reload().await.is_err());
    assert_eq!(loader.get().await.queue.database.table_name, "second");

    assert_eq!(loader.get_value::<u64>("queue.database.max_concurrency").await, Some(10));
    assert!(loader.get_value::<String>("queue.nope").await.is_none());
}

#[tokio::test]
async fn test_rendered_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let rendered = AppConfig::default().to_toml_string().unwrap();
    write(&dir, "default.toml", &rendered);

    let loader = ConfigLoader::with_env_prefix(dir_str(&dir), "SINGLET_RENDERED").unwrap();
    let config = loader.get().await;
    assert_eq!(config.app.name, "singlet");
    assert_eq!(config.queue.redis.prefix, "bull");
}
