//! Addon discovery and indexing
//!
//! A registry owns every addon found directly below one root directory. Each
//! addon lives in a subdirectory whose name consists of ASCII letters and
//! holds a declaration file. Problems with one addon never stop discovery of
//! the others; they are collected in a [`ScanReport`].
//!
//! The index is immutable once built. [`Registry::rescan`] builds a fresh one
//! and swaps it in, so queries never observe a half built index.

pub mod query;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::addon::metadata::{AddonId, Metadata};
use crate::addon::unit::AddonUnit;
use crate::core::config::DEFAULT_DECLARATION_FILE;
use crate::core::error::{AddonError, Result};
use crate::status::StatusStore;
use query::Index;

pub use query::QueryFilter;

/// Subdirectory that could not be registered
#[derive(Debug)]
pub struct SkippedAddon {
    pub path: PathBuf,
    pub error: AddonError,
}

/// Addon ignored because its id was already taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAddon {
    pub id: AddonId,
    /// Directory of the addon that keeps the id
    pub first: PathBuf,
    pub duplicate: PathBuf,
}

impl DuplicateAddon {
    pub fn to_error(&self) -> AddonError {
        AddonError::DuplicateId {
            id: self.id.clone(),
            first: self.first.clone(),
            duplicate: self.duplicate.clone(),
        }
    }
}

/// Per-addon problems found by a scan
#[derive(Debug, Default)]
pub struct ScanReport {
    pub skipped: Vec<SkippedAddon>,
    pub duplicates: Vec<DuplicateAddon>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.duplicates.is_empty()
    }
}

/// Result of [`Registry::discover`]
///
/// The registry is usable even when the report lists problems; for duplicate
/// ids the first discovered addon is indexed.
#[derive(Debug)]
pub struct Discovery {
    pub registry: Registry,
    pub report: ScanReport,
}

impl Discovery {
    /// Fail with `DuplicateId` if two addons declared the same id
    pub fn ensure_unique(&self) -> Result<()> {
        match self.report.duplicates.first() {
            Some(duplicate) => Err(duplicate.to_error()),
            None => Ok(()),
        }
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

/// Either an id or a unit already at hand
#[derive(Debug, Clone, Copy)]
pub enum AddonRef<'a> {
    Id(&'a str),
    Unit(&'a AddonUnit),
}

impl<'a> From<&'a str> for AddonRef<'a> {
    fn from(id: &'a str) -> Self {
        AddonRef::Id(id)
    }
}

impl<'a> From<&'a String> for AddonRef<'a> {
    fn from(id: &'a String) -> Self {
        AddonRef::Id(id)
    }
}

impl<'a> From<&'a AddonUnit> for AddonRef<'a> {
    fn from(unit: &'a AddonUnit) -> Self {
        AddonRef::Unit(unit)
    }
}

impl<'a> From<&'a Arc<AddonUnit>> for AddonRef<'a> {
    fn from(unit: &'a Arc<AddonUnit>) -> Self {
        AddonRef::Unit(unit)
    }
}

/// Id-indexed, queryable collection of addon units
pub struct Registry {
    root: PathBuf,
    declaration_file: String,
    store: Arc<dyn StatusStore>,
    index: RwLock<Arc<Index>>,
}

impl Registry {
    /// Scan `root` for addons declared in `addon.json`
    pub fn discover(root: impl Into<PathBuf>, store: Arc<dyn StatusStore>) -> Result<Discovery> {
        Self::discover_with(root, DEFAULT_DECLARATION_FILE, store)
    }

    /// Scan `root` for addons declared in `declaration_file`
    ///
    /// Fails only if the root itself cannot be read or the status store
    /// fails; per-addon problems end up in the report.
    pub fn discover_with(
        root: impl Into<PathBuf>,
        declaration_file: impl Into<String>,
        store: Arc<dyn StatusStore>,
    ) -> Result<Discovery> {
        let registry = Registry {
            root: root.into(),
            declaration_file: declaration_file.into(),
            store,
            index: RwLock::new(Arc::new(Index::default())),
        };
        let report = registry.rescan()?;
        Ok(Discovery { registry, report })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn declaration_file(&self) -> &str {
        &self.declaration_file
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, id: &str) -> Result<Arc<AddonUnit>> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| AddonError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().get(id).is_some()
    }

    /// Every unit in discovery order
    pub fn units(&self) -> Vec<Arc<AddonUnit>> {
        self.snapshot().units()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Units matching every supplied filter, in discovery order
    pub fn query(&self, filter: &QueryFilter) -> Vec<Arc<AddonUnit>> {
        self.snapshot().query(filter)
    }

    /// Persist the enabled flag, then update the in-memory unit
    ///
    /// A unit passed directly must be the one indexed under its id; units of
    /// another registry, or ones dropped by a rescan, fail with `NotFound`.
    pub fn set_enabled<'a>(&self, addon: impl Into<AddonRef<'a>>, enabled: bool) -> Result<()> {
        let unit = match addon.into() {
            AddonRef::Id(id) => self.get(id)?,
            AddonRef::Unit(unit) => {
                let indexed = self.get(unit.id())?;
                if !std::ptr::eq(Arc::as_ptr(&indexed), unit) {
                    return Err(AddonError::NotFound(format!(
                        "{} (unit is not part of this registry)",
                        unit.id()
                    )));
                }
                indexed
            }
        };

        self.store.set_enabled(unit.id(), enabled)?;
        unit.set_enabled_flag(enabled);
        info!(addon_id = %unit.id(), enabled, "Addon status changed");
        Ok(())
    }

    pub fn enable<'a>(&self, addon: impl Into<AddonRef<'a>>) -> Result<()> {
        self.set_enabled(addon, true)
    }

    pub fn disable<'a>(&self, addon: impl Into<AddonRef<'a>>) -> Result<()> {
        self.set_enabled(addon, false)
    }

    pub fn is_enabled(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_enabled())
    }

    /// Rebuild the index from disk and swap it in
    ///
    /// Units whose id and directory are unchanged are kept (with refreshed
    /// metadata), so loaded modules survive. Units whose directory vanished
    /// are dropped.
    pub fn rescan(&self) -> Result<ScanReport> {
        let previous = self.snapshot();
        let (index, report) = self.scan(&previous)?;

        info!(
            root = ?self.root,
            addons = index.len(),
            skipped = report.skipped.len(),
            duplicates = report.duplicates.len(),
            "Addon discovery completed"
        );

        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        Ok(report)
    }

    /// Remove `id` from the index; its persisted status is kept
    pub fn unregister(&self, id: &str) -> Result<Arc<AddonUnit>> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let unit = index
            .get(id)
            .cloned()
            .ok_or_else(|| AddonError::NotFound(id.to_string()))?;
        let remaining = Arc::new(index.without(id));
        *index = remaining;
        debug!(addon_id = %id, "Addon unregistered");
        Ok(unit)
    }

    fn scan(&self, previous: &Index) -> Result<(Index, ScanReport)> {
        if !self.root.is_dir() {
            return Err(AddonError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("addon root {} is not a directory", self.root.display()),
            )));
        }

        let mut report = ScanReport::default();
        let mut units: Vec<Arc<AddonUnit>> = Vec::new();
        let mut seen: HashMap<AddonId, PathBuf> = HashMap::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
                    warn!(path = ?path, error = %err, "Failed to read addon root entry");
                    report.skipped.push(SkippedAddon {
                        path,
                        error: AddonError::Io(err.into()),
                    });
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy();
            if dir_name.starts_with('.') {
                continue;
            }
            if !is_addon_dir_name(&dir_name) {
                debug!(path = ?path, "Skipping directory with invalid addon name");
                report.skipped.push(SkippedAddon {
                    path: path.to_path_buf(),
                    error: AddonError::Validation(format!(
                        "addon directory name {:?} must consist of ASCII letters only",
                        dir_name
                    )),
                });
                continue;
            }

            let metadata = match Metadata::load(&path.join(&self.declaration_file)) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = ?path, error = %err, "Skipping malformed addon");
                    report.skipped.push(SkippedAddon {
                        path: path.to_path_buf(),
                        error: err,
                    });
                    continue;
                }
            };

            if let Some(first) = seen.get(&metadata.id) {
                warn!(
                    addon_id = %metadata.id,
                    first = ?first,
                    duplicate = ?path,
                    "Duplicate addon id, keeping the first one"
                );
                report.duplicates.push(DuplicateAddon {
                    id: metadata.id.clone(),
                    first: first.clone(),
                    duplicate: path.to_path_buf(),
                });
                continue;
            }

            let enabled = self.store.enabled(&metadata.id)?.unwrap_or(false);
            seen.insert(metadata.id.clone(), path.to_path_buf());

            let unit = match previous.get(&metadata.id) {
                Some(existing) if existing.path() == path => {
                    *existing.metadata_mut() = metadata;
                    Arc::clone(existing)
                }
                _ => Arc::new(AddonUnit::new(metadata, path)),
            };
            unit.set_enabled_flag(enabled);
            debug!(addon_id = %unit.id(), path = ?path, enabled, "Addon discovered");
            units.push(unit);
        }

        Ok((Index::build(units), report))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("root", &self.root)
            .field("declaration_file", &self.declaration_file)
            .field("addons", &self.len())
            .finish()
    }
}

fn is_addon_dir_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic())
}
