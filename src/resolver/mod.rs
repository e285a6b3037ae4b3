//! Dependency resolution with verdict caching
//!
//! The resolver asks an [`Installer`] whether each depends entry of an addon is
//! satisfied and caches the outcome per addon, keyed by a digest of the depends
//! list. Any edit of the list changes the digest, so a stale verdict is never
//! served. Verdicts can also be persisted in a [`StatusStore`] and are then
//! revalidated against the current digest after a restart.
//!
//! Locking: every addon has its own slot lock, held only to read or publish a
//! verdict. Installer calls run with no lock held; a verdict computed while an
//! invalidation raced with it is returned to its caller but not cached.

pub mod installer;
pub mod requirement;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::addon::metadata::AddonId;
use crate::addon::unit::AddonUnit;
use crate::core::error::{AggregateInstallError, Result};
use crate::core::utils::digest_strings;
use crate::status::StatusStore;

pub use installer::{DependencySpec, Installer};
pub use requirement::VersionRequirement;

/// Outcome of a dependency check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyVerdict {
    /// True iff every entry was satisfied
    pub satisfied: bool,

    /// Depends list the verdict was computed for
    pub checked_against: Vec<String>,

    /// sha256 over `checked_against`
    pub digest: String,

    pub checked_at: DateTime<Utc>,

    /// Entries the installer reported as unsatisfied, in declaration order
    #[serde(default)]
    pub unsatisfied: Vec<String>,
}

impl DependencyVerdict {
    /// Whether this verdict still describes `depends`
    pub fn is_valid_for(&self, depends: &[String]) -> bool {
        self.checked_against == depends && self.digest == digest_strings(depends)
    }
}

#[derive(Default)]
struct Slot {
    verdict: Option<DependencyVerdict>,
    /// Bumped by every invalidation
    epoch: u64,
}

/// Checks and installs addon dependencies through an [`Installer`]
#[derive(Default)]
pub struct DependencyResolver {
    slots: RwLock<HashMap<AddonId, Arc<Mutex<Slot>>>>,
    store: Option<Arc<dyn StatusStore>>,
}

impl DependencyResolver {
    /// Resolver with an in-memory cache only
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that also persists verdicts in `store`
    pub fn with_store(store: Arc<dyn StatusStore>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Whether every depends entry of `unit` is satisfied
    ///
    /// Served from the cache while the depends list is unchanged; otherwise
    /// `installer.is_satisfied` is asked once per entry.
    pub fn check(&self, unit: &AddonUnit, installer: &dyn Installer) -> Result<bool> {
        Ok(self.verdict(unit, installer)?.satisfied)
    }

    /// Full verdict for `unit`, computing it on a cache miss
    pub fn verdict(&self, unit: &AddonUnit, installer: &dyn Installer) -> Result<DependencyVerdict> {
        let depends = unit.depends();
        let slot = self.slot(unit.id());

        let epoch = {
            let guard = lock(&slot);
            if let Some(verdict) = guard.verdict.as_ref().filter(|v| v.is_valid_for(&depends)) {
                debug!(addon_id = %unit.id(), "Dependency verdict cache hit");
                return Ok(verdict.clone());
            }
            guard.epoch
        };

        if let Some(verdict) = self.persisted(unit.id(), &depends) {
            let mut guard = lock(&slot);
            if guard.epoch == epoch {
                debug!(addon_id = %unit.id(), "Using persisted dependency verdict");
                guard.verdict = Some(verdict.clone());
                return Ok(verdict);
            }
        }

        let verdict = compute(unit.id(), &depends, installer)?;
        self.publish(unit.id(), &slot, epoch, &verdict);
        Ok(verdict)
    }

    /// Ignore any cached verdict and ask the installer again
    pub fn recheck(&self, unit: &AddonUnit, installer: &dyn Installer) -> Result<bool> {
        self.invalidate(unit.id())?;
        self.check(unit, installer)
    }

    /// Valid verdict for `unit` without consulting an installer
    pub fn cached_verdict(&self, unit: &AddonUnit) -> Option<DependencyVerdict> {
        let depends = unit.depends();
        let slot = self.slot(unit.id());
        let epoch = {
            let guard = lock(&slot);
            if let Some(verdict) = guard.verdict.as_ref().filter(|v| v.is_valid_for(&depends)) {
                return Some(verdict.clone());
            }
            guard.epoch
        };

        let verdict = self.persisted(unit.id(), &depends)?;
        let mut guard = lock(&slot);
        if guard.epoch == epoch {
            guard.verdict = Some(verdict.clone());
        }
        Some(verdict)
    }

    /// Drop the cached and persisted verdict of `id`
    pub fn invalidate(&self, id: &str) -> Result<()> {
        let slot = self.slot(id);
        {
            let mut guard = lock(&slot);
            guard.verdict = None;
            guard.epoch += 1;
        }
        if let Some(store) = &self.store {
            store.clear_verdict(id)?;
        }
        debug!(addon_id = %id, "Dependency verdict invalidated");
        Ok(())
    }

    /// Install every unsatisfied entry of `unit`, in declaration order
    ///
    /// Stops at the first failing install. The cache entry is invalidated on
    /// every outcome, so the next check asks the installer again.
    pub fn satisfy(&self, unit: &AddonUnit, installer: &dyn Installer) -> Result<()> {
        let outcome = self.install_missing(unit, installer);
        let invalidated = self.invalidate(unit.id());
        let report = outcome?;
        invalidated?;

        match report {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn install_missing(
        &self,
        unit: &AddonUnit,
        installer: &dyn Installer,
    ) -> Result<Option<AggregateInstallError>> {
        let verdict = self.verdict(unit, installer)?;
        let pending = DependencySpec::parse_all(&verdict.unsatisfied)?;

        let mut succeeded = Vec::new();
        for (position, spec) in pending.iter().enumerate() {
            info!(addon_id = %unit.id(), dependency = %spec, "Installing dependency");
            if let Err(err) = installer.install(&spec.name, &spec.constraint) {
                warn!(addon_id = %unit.id(), dependency = %spec, error = %err, "Dependency install failed");
                let skipped = pending[position + 1..].iter().map(|s| s.to_string()).collect();
                return Ok(Some(AggregateInstallError {
                    addon_id: unit.id().to_string(),
                    failed: vec![err],
                    succeeded,
                    skipped,
                }));
            }
            succeeded.push(spec.to_string());
        }

        if !succeeded.is_empty() {
            info!(addon_id = %unit.id(), count = succeeded.len(), "Dependencies installed");
        }
        Ok(None)
    }

    fn slot(&self, id: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().unwrap_or_else(PoisonError::into_inner).get(id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.to_string()).or_default())
    }

    fn persisted(&self, id: &str, depends: &[String]) -> Option<DependencyVerdict> {
        let store = self.store.as_ref()?;
        match store.verdict(id) {
            Ok(verdict) => verdict.filter(|v| v.is_valid_for(depends)),
            Err(err) => {
                warn!(addon_id = %id, error = %err, "Failed to read persisted verdict");
                None
            }
        }
    }

    fn publish(&self, id: &str, slot: &Mutex<Slot>, epoch: u64, verdict: &DependencyVerdict) {
        let mut guard = lock(slot);
        if guard.epoch != epoch {
            debug!(addon_id = %id, "Verdict invalidated during check, not caching");
            return;
        }
        guard.verdict = Some(verdict.clone());

        // Persisting under the slot lock keeps store and cache in step
        if let Some(store) = &self.store {
            if let Err(err) = store.put_verdict(id, verdict) {
                warn!(addon_id = %id, error = %err, "Failed to persist dependency verdict");
            }
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ask the installer about every entry; no locks are held here
fn compute(id: &str, depends: &[String], installer: &dyn Installer) -> Result<DependencyVerdict> {
    let specs = DependencySpec::parse_all(depends)?;

    let unsatisfied: Vec<String> = depends
        .iter()
        .zip(&specs)
        .filter(|(_, spec)| !installer.is_satisfied(&spec.name, &spec.constraint))
        .map(|(entry, _)| entry.clone())
        .collect();

    let verdict = DependencyVerdict {
        satisfied: unsatisfied.is_empty(),
        checked_against: depends.to_vec(),
        digest: digest_strings(depends),
        checked_at: Utc::now(),
        unsatisfied,
    };

    debug!(
        addon_id = %id,
        satisfied = verdict.satisfied,
        unsatisfied = ?verdict.unsatisfied,
        "Dependency check completed"
    );
    Ok(verdict)
}
