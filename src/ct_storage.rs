// On-device key-value storage.
//
// Values are JSON strings, keyed by name, the way the mobile client stored
// them. The file-backed store keeps every key in a single JSON object.

use crate::ct_models::{Result, TransitError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const FAVORITES_KEY: &str = "favorites";
pub const DEFAULT_GROUP_KEY: &str = "default-group";

#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

// ============================================================================
// File storage
// ============================================================================

pub struct FileStorage {
    path: PathBuf,
    // Serialises read-modify-write cycles on the backing file.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        FileStorage {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("campus_transit");
        path.push("storage.json");
        path
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(TransitError::StorageError(format!(
                    "Failed to read {:?}: {}",
                    self.path, e
                )));
            }
        };

        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            TransitError::StorageError(format!("Corrupt storage file {:?}: {}", self.path, e))
        })
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.read_all().await?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TransitError::StorageError(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let json = serde_json::to_string_pretty(&items)
            .map_err(|e| TransitError::StorageError(format!("Failed to serialize storage: {}", e)))?;

        tokio::fs::write(&self.path, json).await.map_err(|e| {
            TransitError::StorageError(format!("Failed to write {:?}: {}", self.path, e))
        })?;

        log::debug!("Stored '{}' in {:?}", key, self.path);
        Ok(())
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(key: &str, value: &str) -> Self {
        let storage = Self::new();
        if let Ok(mut items) = storage.items.lock() {
            items.insert(key.to_string(), value.to_string());
        }
        storage
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| TransitError::StorageError("storage lock poisoned".to_string()))?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| TransitError::StorageError("storage lock poisoned".to_string()))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
