//! Persistence bridge for small key-value records.
//!
//! The Bluetooth core only persists one record per device role (the last
//! successfully connected device), so the store surface is a minimal
//! JSON-valued get/set. The file-backed store keeps one file per key under
//! a data directory; the in-memory store backs tests and ephemeral runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use log::debug;
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Minimal key-value persistence consumed by the connection orchestrator.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// File-backed store: one `<key>.json` per key under `data_dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content)
            .map_err(|e| BridgeError::Persistence(format!("{}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&value)?;
        std::fs::write(&path, content)?;
        debug!("Persisted {} to {:?}", key, path);
        Ok(())
    }
}

/// In-memory store; last-write-wins, nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}
