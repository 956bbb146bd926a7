//! Persistence backends for brightness memory.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::fade::MemoryRecord;

pub type Records = HashMap<String, MemoryRecord>;

/// Key/value store holding one `MemoryRecord` per light.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self) -> Result<Records, StorageError>;

    /// Replace the stored mapping with `records`.
    async fn save(&self, records: &Records) -> Result<(), StorageError>;
}

/// JSON file on disk.
///
/// Saves go to a sibling temporary file which is then renamed over the
/// target, so a reader never sees a half-written file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn load(&self) -> Result<Records, StorageError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No brightness memory at {}, starting empty", self.path.display());
                return Ok(Records::new());
            }
            Err(e) => return Err(StorageError::Io(self.path.clone(), e)),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    async fn save(&self, records: &Records) -> Result<(), StorageError> {
        let contents = serde_json::to_vec_pretty(records)?;
        let temp = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(parent.to_path_buf(), e))?;
        }
        tokio::fs::write(&temp, contents)
            .await
            .map_err(|e| StorageError::Io(temp.clone(), e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::Io(self.path.clone(), e))?;

        debug!("Saved {} brightness records to {}", records.len(), self.path.display());
        Ok(())
    }
}

/// Storage that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Records>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Records) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Copy of what was last saved.
    pub fn records(&self) -> Records {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> Result<Records, StorageError> {
        Ok(self.records())
    }

    async fn save(&self, records: &Records) -> Result<(), StorageError> {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records.clone();
        Ok(())
    }
}
