//! Durable key-value store contract and file-backed implementation
//!
//! Persisted documents are JSON, one per key. The store is best-effort
//! throughout: callers degrade to in-memory operation when it is
//! unreachable, and a corrupted document is preserved under a
//! timestamped backup name instead of aborting the load.

use crate::error::{HelionError, Result};
use crate::logging::get_logger;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Read/write contract for durable JSON documents
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a document by key; `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a document wholesale under a key
    async fn put(&self, key: &str, value: &Value) -> Result<()>;
}

/// File-backed store keeping one pretty-printed JSON file per key
pub struct FileStore {
    data_dir: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl FileStore {
    /// Create a new file store rooted at `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            logger: get_logger("store"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key))
    }

    /// Move an unparsable document aside so its contents survive for
    /// inspection, then report the key as absent.
    async fn quarantine(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let backup = self.data_dir.join(format!(
            "{}.corrupt-{}.json",
            key,
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        ));
        tokio::fs::rename(&path, &backup).await?;
        self.logger.warn(&format!(
            "Corrupted document '{}' backed up to {}",
            key,
            backup.display()
        ));
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HelionError::persistence(format!("read '{}': {}", key, e)))?;

        match serde_json::from_str(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.logger
                    .error(&format!("Failed to parse document '{}': {}", key, e));
                // Never fatal: preserve the payload and fall back to defaults
                let _ = self.quarantine(key).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| HelionError::persistence(format!("create data dir: {}", e)))?;

        let contents = serde_json::to_string_pretty(value)?;
        tokio::fs::write(self.path_for(key), contents)
            .await
            .map_err(|e| HelionError::persistence(format!("write '{}': {}", key, e)))?;
        Ok(())
    }
}
