//! Per-addon key/value storage kept in `storage.json` inside the addon directory

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{ErrorContext, Result};
use crate::core::utils::write_json_atomic;

pub const STORAGE_FILE: &str = "storage.json";

/// JSON-backed settings an addon keeps between runs
///
/// Changes stay in memory until [`AddonStorage::save`].
#[derive(Debug, Clone)]
pub struct AddonStorage {
    path: PathBuf,
    data: Map<String, Value>,
}

impl AddonStorage {
    /// Open the storage of the addon in `addon_dir`
    pub fn open(addon_dir: &Path) -> Result<Self> {
        let path = addon_dir.join(STORAGE_FILE);
        let mut storage = Self {
            path,
            data: Map::new(),
        };
        storage.read()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Discard unsaved changes and re-read the file
    pub fn read(&mut self) -> Result<()> {
        if !self.exists() {
            self.data = Map::new();
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)?;
        self.data = serde_json::from_str(&contents)
            .with_context(|| format!("Corrupt {}", self.path.display()))?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.data)
    }

    /// Add every missing key from `defaults`, saving if anything was added
    ///
    /// Returns whether the file was written.
    pub fn initialize(&mut self, defaults: Map<String, Value>) -> Result<bool> {
        let mut changed = false;
        for (key, value) in defaults {
            if !self.data.contains_key(&key) {
                self.data.insert(key, value);
                changed = true;
            }
        }

        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize the value stored under `key`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }
}
