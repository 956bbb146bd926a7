//! Brightness memory: what each light should come back to.
//!
//! `original` is the brightness the user last chose for a light, restored
//! when the light is switched back on. `previous` is the brightness observed
//! right before the light was last switched off, used to tell a plain
//! power-on apart from a power-on at a new brightness.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::Records;
use crate::storage::Storage;

/// Persisted per-light record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Last user-intended "on" brightness; 0 when unknown.
    #[serde(default)]
    pub original: u8,

    /// Brightness right before the last switch-off; 0 when unknown.
    #[serde(default)]
    pub previous: u8,

    /// Excluded lights are never faded or restored.
    #[serde(default)]
    pub excluded: bool,
}

pub struct BrightnessMemory {
    storage: Arc<dyn Storage>,
    records: Mutex<Records>,
    dirty: AtomicBool,
    save_lock: tokio::sync::Mutex<()>,
}

impl BrightnessMemory {
    /// Load every stored record.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let records = storage.load().await?;
        debug!("Loaded brightness memory for {} lights", records.len());
        Ok(Self {
            storage,
            records: Mutex::new(records),
            dirty: AtomicBool::new(false),
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a light's record, creating it if needed.
    fn update(&self, light_id: &str, f: impl FnOnce(&mut MemoryRecord)) {
        let mut records = self.lock();
        let record = records.entry(light_id.to_string()).or_default();
        let before = *record;
        f(record);
        if *record != before {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn get(&self, light_id: &str) -> MemoryRecord {
        self.lock().get(light_id).copied().unwrap_or_default()
    }

    pub fn original(&self, light_id: &str) -> u8 {
        self.get(light_id).original
    }

    pub fn previous(&self, light_id: &str) -> u8 {
        self.get(light_id).previous
    }

    pub fn is_excluded(&self, light_id: &str) -> bool {
        self.get(light_id).excluded
    }

    /// Set `original` unless one is already stored. Returns whether it was
    /// set.
    pub fn seed_original(&self, light_id: &str, brightness: u8) -> bool {
        let mut seeded = false;
        self.update(light_id, |r| {
            if r.original == 0 && brightness > 0 {
                r.original = brightness;
                seeded = true;
            }
        });
        seeded
    }

    pub fn set_original(&self, light_id: &str, brightness: u8) {
        self.update(light_id, |r| r.original = brightness);
    }

    pub fn set_previous(&self, light_id: &str, brightness: u8) {
        self.update(light_id, |r| r.previous = brightness);
    }

    pub fn set_excluded(&self, light_id: &str, excluded: bool) {
        self.update(light_id, |r| r.excluded = excluded);
    }

    pub fn forget(&self, light_id: &str) {
        if self.lock().remove(light_id).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Sorted copy of every record.
    pub fn records(&self) -> BTreeMap<String, MemoryRecord> {
        self.lock()
            .iter()
            .map(|(id, record)| (id.clone(), *record))
            .collect()
    }

    /// Persist pending changes. Does nothing when nothing changed since the
    /// last successful save.
    ///
    /// On failure the changes stay pending and the next flush retries them.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let _guard = self.save_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.lock().clone();
        if let Err(e) = self.storage.save(&snapshot).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::storage::JsonFileStorage;
    use crate::storage::MemoryStorage;

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn load(&self) -> Result<Records, StorageError> {
            Ok(Records::new())
        }

        async fn save(&self, _records: &Records) -> Result<(), StorageError> {
            Err(StorageError::Io(
                "/unwritable".into(),
                std::io::Error::other("read-only file system"),
            ))
        }
    }

    #[tokio::test]
    async fn test_seed_never_overwrites() {
        let memory = BrightnessMemory::load(Arc::new(MemoryStorage::new()))
            .await
            .unwrap();
        assert!(memory.seed_original("light.a", 204));
        assert!(!memory.seed_original("light.a", 50));
        assert_eq!(memory.original("light.a"), 204);

        memory.set_original("light.a", 50);
        assert_eq!(memory.original("light.a"), 50);
        assert!(!memory.seed_original("light.b", 0));
    }

    #[tokio::test]
    async fn test_flush_only_when_dirty() {
        let storage = Arc::new(MemoryStorage::new());
        let memory = BrightnessMemory::load(storage.clone()).await.unwrap();

        memory.set_previous("light.a", 76);
        memory.flush().await.unwrap();
        assert_eq!(storage.records()["light.a"].previous, 76);

        // A no-op update does not dirty the memory.
        memory.set_previous("light.a", 76);
        assert!(!memory.dirty.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_memory_and_retries() {
        let memory = BrightnessMemory::load(Arc::new(FailingStorage)).await.unwrap();
        memory.set_original("light.a", 120);
        assert!(memory.flush().await.is_err());
        assert_eq!(memory.original("light.a"), 120);
        assert!(memory.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let memory = BrightnessMemory::load(Arc::new(JsonFileStorage::new(&path)))
            .await
            .unwrap();
        memory.set_original("light.a", 204);
        memory.set_previous("light.a", 76);
        memory.set_excluded("light.b", true);
        memory.flush().await.unwrap();

        let reloaded = BrightnessMemory::load(Arc::new(JsonFileStorage::new(&path)))
            .await
            .unwrap();
        assert_eq!(reloaded.records(), memory.records());
        assert_eq!(
            reloaded.get("light.a"),
            MemoryRecord {
                original: 204,
                previous: 76,
                excluded: false
            }
        );
        assert!(reloaded.is_excluded("light.b"));
    }

    #[tokio::test]
    async fn test_forget() {
        let storage = Arc::new(MemoryStorage::new());
        let memory = BrightnessMemory::load(storage.clone()).await.unwrap();
        memory.set_original("light.a", 10);
        memory.flush().await.unwrap();
        memory.forget("light.a");
        memory.flush().await.unwrap();
        assert!(storage.records().is_empty());
        assert_eq!(memory.get("light.a"), MemoryRecord::default());
    }
}
