#![cfg(test)]
use std::path::{Path, PathBuf};

use configs::{DatabaseConfig, PoolConfig};

use crate::storage::KvStore;

/// Fresh sqlite-backed store in a unique temp file.
pub async fn temp_store() -> Result<(KvStore, PathBuf), anyhow::Error> {
    let path = std::env::temp_dir().join(format!("rollar_kv_{}.db", uuid::Uuid::new_v4()));
    let cfg = DatabaseConfig { kind: "sqlite".into(), path: path.display().to_string(), ..DatabaseConfig::default() };
    let descriptor = models::db::resolve(&cfg)?;
    let store = KvStore::open(&descriptor, &PoolConfig::default()).await?;
    Ok((store, path))
}

/// Close the pool and remove the database file with its WAL companions.
pub async fn cleanup(store: KvStore, path: &Path) {
    let _ = store.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let file = PathBuf::from(format!("{}{}", path.display(), suffix));
        let _ = tokio::fs::remove_file(file).await;
    }
}
