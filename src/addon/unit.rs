//! In-memory handle to one addon on disk

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::metadata::{AddonId, Metadata};
use super::namespace::Namespace;
use super::storage::AddonStorage;
use crate::core::error::Result;
use crate::lifecycle::handle::{LifecycleState, LoadedModule, ModuleHandle};

/// One discovered addon
///
/// The id is fixed when the unit is created. The enabled flag mirrors the
/// status store and is only changed through the registry. Lifecycle state is
/// owned by [`crate::lifecycle::LifecycleController`].
pub struct AddonUnit {
    id: AddonId,
    path: PathBuf,
    metadata: RwLock<Metadata>,
    enabled: AtomicBool,
    namespace: RwLock<Namespace>,
    runtime: Mutex<Option<LoadedModule>>,
}

impl AddonUnit {
    /// Create a unit for the addon directory `path`
    pub fn new(metadata: Metadata, path: impl Into<PathBuf>) -> Self {
        Self {
            id: metadata.id.clone(),
            path: path.into(),
            metadata: RwLock::new(metadata),
            enabled: AtomicBool::new(false),
            namespace: RwLock::new(Namespace::new()),
            runtime: Mutex::new(None),
        }
    }

    /// Load the declaration `declaration_file` from the addon directory `dir`
    pub fn from_dir(dir: &Path, declaration_file: &str) -> Result<Self> {
        let metadata = Metadata::load(&dir.join(declaration_file))?;
        Ok(Self::new(metadata, dir))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Addon directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current metadata
    pub fn metadata(&self) -> Metadata {
        self.read_metadata().clone()
    }

    pub fn read_metadata(&self) -> RwLockReadGuard<'_, Metadata> {
        self.metadata.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access for edits, typed extra views and saves
    pub fn metadata_mut(&self) -> RwLockWriteGuard<'_, Metadata> {
        self.metadata.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn depends(&self) -> Vec<String> {
        self.read_metadata().depends.clone()
    }

    /// Location of the entry module named by the metadata
    pub fn module_path(&self) -> PathBuf {
        self.path.join(&self.read_metadata().module)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled_flag(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Copy of the base namespace
    pub fn namespace(&self) -> Namespace {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutable base namespace; changes apply to the next load
    pub fn namespace_mut(&self) -> RwLockWriteGuard<'_, Namespace> {
        self.namespace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the addon's `storage.json`
    pub fn storage(&self) -> Result<AddonStorage> {
        AddonStorage::open(&self.path)
    }

    pub fn state(&self) -> LifecycleState {
        match self.runtime().as_ref() {
            Some(_) => LifecycleState::Loaded,
            None => LifecycleState::Unloaded,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LifecycleState::Loaded
    }

    /// Handle of the loaded entry module, if any
    pub fn module(&self) -> Option<ModuleHandle> {
        self.runtime().as_ref().map(|loaded| loaded.handle.clone())
    }

    pub(crate) fn runtime(&self) -> MutexGuard<'_, Option<LoadedModule>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AddonUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonUnit")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}
