//! Status store kept in a single JSON file
//!
//! The file maps addon ids to their records. Every write re-reads the file,
//! applies the change and replaces it atomically, so flags written by another
//! process (for example `addonctl enable`) are not clobbered.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{lock, StatusRecord, StatusStore};
use crate::core::error::{ErrorContext, Result};
use crate::core::utils::write_json_atomic;
use crate::resolver::DependencyVerdict;

type Records = BTreeMap<String, StatusRecord>;

pub struct JsonStatusStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStatusStore {
    /// Open the store at `path`; the file is created on first write
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        // Surface a corrupt file at open time instead of on first use
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Records> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Records::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Corrupt status file {}", self.path.display()))
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Records) -> bool,
    {
        let _guard = lock(&self.write_lock)?;
        let mut records = self.read()?;
        if f(&mut records) {
            write_json_atomic(&self.path, &records)?;
        }
        Ok(())
    }
}

impl StatusStore for JsonStatusStore {
    fn enabled(&self, id: &str) -> Result<Option<bool>> {
        Ok(self.read()?.get(id).map(|r| r.enabled))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.update(|records| {
            records.entry(id.to_string()).or_default().enabled = enabled;
            true
        })
    }

    fn verdict(&self, id: &str) -> Result<Option<DependencyVerdict>> {
        Ok(self.read()?.remove(id).and_then(|r| r.verdict))
    }

    fn put_verdict(&self, id: &str, verdict: &DependencyVerdict) -> Result<()> {
        self.update(|records| {
            records.entry(id.to_string()).or_default().verdict = Some(verdict.clone());
            true
        })
    }

    fn clear_verdict(&self, id: &str) -> Result<()> {
        self.update(|records| match records.get_mut(id) {
            Some(record) if record.verdict.is_some() => {
                record.verdict = None;
                true
            }
            _ => false,
        })
    }

    fn forget(&self, id: &str) -> Result<()> {
        self.update(|records| records.remove(id).is_some())
    }
}
