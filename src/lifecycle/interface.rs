//! Hook-driven wrapper around the lifecycle of one addon
//!
//! An entry module may define two optional callables:
//! - `on_load(args...)`, run after activation; it may return
//!   [`Attribute::Modules`] naming auxiliary modules to release on unload
//! - `on_unload(args...)`, run before the module is deactivated

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::controller::{LifecycleController, UnloadReport};
use super::handle::{Attribute, ModuleHandle};
use super::proxy::TypedProxy;
use crate::addon::metadata::AddonId;
use crate::addon::namespace::Namespace;
use crate::addon::unit::AddonUnit;
use crate::core::error::{AddonError, Result};
use crate::registry::Registry;
use crate::resolver::Installer;

pub const ON_LOAD: &str = "on_load";
pub const ON_UNLOAD: &str = "on_unload";

/// Which addons hold on to which auxiliary modules
///
/// Shared by every [`Interface`] of a host so a module returned by several
/// `on_load` hooks is only released by the last one.
#[derive(Default)]
pub struct ModuleTracker {
    entries: Mutex<HashMap<Uuid, Tracked>>,
}

struct Tracked {
    handle: ModuleHandle,
    owners: BTreeSet<AddonId>,
}

impl ModuleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, owner: &str, handle: &ModuleHandle) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(handle.id())
            .or_insert_with(|| Tracked {
                handle: handle.clone(),
                owners: BTreeSet::new(),
            })
            .owners
            .insert(owner.to_string());
    }

    /// Drop `owner`'s claim; true when nobody tracks the module any more
    pub fn release(&self, owner: &str, handle: &ModuleHandle) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tracked) = entries.get_mut(&handle.id()) else {
            return true;
        };
        tracked.owners.remove(owner);
        if tracked.owners.is_empty() {
            entries.remove(&handle.id());
            true
        } else {
            false
        }
    }

    pub fn owners(&self, handle: &ModuleHandle) -> Vec<AddonId> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.id())
            .map(|tracked| tracked.owners.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, handle: &ModuleHandle) -> bool {
        !self.owners(handle).is_empty()
    }

    /// Handles currently tracked for `owner`
    pub fn tracked_by(&self, owner: &str) -> Vec<ModuleHandle> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|tracked| tracked.owners.contains(owner))
            .map(|tracked| tracked.handle.clone())
            .collect()
    }
}

/// Outcome of [`Interface::unload`]
///
/// Unload never stops at the first failure. Hook failures are collected in
/// `errors`; deactivation failures stay in the per-module reports.
#[derive(Debug, Default)]
pub struct InterfaceUnloadReport {
    /// Report for the addon's own module
    pub primary: Option<UnloadReport>,
    /// Reports for auxiliary modules that were released
    pub auxiliary: Vec<UnloadReport>,
    /// Auxiliary modules kept because another addon still tracks them
    pub retained: Vec<AddonId>,
    pub errors: Vec<AddonError>,
}

impl InterfaceUnloadReport {
    /// Every failure: hook errors first, then the primary module, then
    /// auxiliary modules in release order
    pub fn all_errors(&self) -> impl Iterator<Item = &AddonError> {
        self.errors
            .iter()
            .chain(self.primary.iter().flat_map(|primary| primary.errors.iter()))
            .chain(self.auxiliary.iter().flat_map(|aux| aux.errors.iter()))
    }

    pub fn is_success(&self) -> bool {
        self.all_errors().next().is_none()
    }
}

/// One addon driven through its `on_load` / `on_unload` hooks
pub struct Interface {
    controller: Arc<LifecycleController>,
    unit: Arc<AddonUnit>,
    tracker: Arc<ModuleTracker>,
    registry: Option<Arc<Registry>>,
}

impl Interface {
    pub fn new(
        controller: Arc<LifecycleController>,
        unit: Arc<AddonUnit>,
        tracker: Arc<ModuleTracker>,
    ) -> Self {
        Self {
            controller,
            unit,
            tracker,
            registry: None,
        }
    }

    /// Auxiliary modules owned by units of `registry` are released through the
    /// controller instead of being deactivated directly
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn unit(&self) -> &Arc<AddonUnit> {
        &self.unit
    }

    /// Load the addon, then run its `on_load` hook with `args`
    ///
    /// Handles returned by the hook are tracked for [`Interface::unload`]. A
    /// failing hook is reported to the caller; the module stays loaded. If
    /// the addon is already loaded its handle is returned and the hook does
    /// not run again.
    pub fn load(
        &self,
        installer: Option<&dyn Installer>,
        overrides: Option<&Namespace>,
        args: &[Value],
    ) -> Result<ModuleHandle> {
        if let Some(handle) = self.unit.module() {
            debug!(addon_id = %self.unit.id(), "Interface already loaded");
            return Ok(handle);
        }

        let handle = self.controller.load(&self.unit, installer, overrides)?;

        let hook = TypedProxy::new(handle.clone()).get_callable(ON_LOAD);
        if let Some(hook) = hook {
            match hook.call(args)? {
                Some(Attribute::Modules(handles)) => {
                    for auxiliary in &handles {
                        debug!(
                            addon_id = %self.unit.id(),
                            auxiliary = %auxiliary.addon_id(),
                            "Tracking auxiliary module"
                        );
                        self.tracker.track(self.unit.id(), auxiliary);
                    }
                }
                Some(other) => debug!(
                    addon_id = %self.unit.id(),
                    kind = other.kind(),
                    "on_load returned no modules"
                ),
                None => {}
            }
        }

        Ok(handle)
    }

    /// Run `on_unload`, then unload the addon and its auxiliary modules
    pub fn unload(&self, args: &[Value]) -> InterfaceUnloadReport {
        let mut report = InterfaceUnloadReport::default();

        let hook = self
            .unit
            .module()
            .and_then(|handle| TypedProxy::new(handle).get_callable(ON_UNLOAD));
        if let Some(hook) = hook {
            if let Err(err) = hook.call(args) {
                warn!(addon_id = %self.unit.id(), error = %err, "on_unload failed");
                report.errors.push(err);
            }
        }

        report.primary = Some(self.controller.unload(&self.unit));

        for auxiliary in self.tracker.tracked_by(self.unit.id()) {
            if !self.tracker.release(self.unit.id(), &auxiliary) {
                debug!(
                    addon_id = %self.unit.id(),
                    auxiliary = %auxiliary.addon_id(),
                    "Auxiliary module still tracked by another addon"
                );
                report.retained.push(auxiliary.addon_id().to_string());
                continue;
            }
            report.auxiliary.push(self.release_auxiliary(auxiliary));
        }

        report
    }

    fn release_auxiliary(&self, auxiliary: ModuleHandle) -> UnloadReport {
        let owner = self
            .registry
            .as_ref()
            .and_then(|registry| registry.get(auxiliary.addon_id()).ok())
            .filter(|unit| {
                unit.module()
                    .map(|loaded| loaded.ptr_eq(&auxiliary))
                    .unwrap_or(false)
            });

        if let Some(owner) = owner {
            drop(auxiliary);
            return self.controller.unload(&owner);
        }

        let was_loaded = auxiliary.is_active();
        let mut errors = Vec::new();
        if let Err(err) = auxiliary.deactivate() {
            warn!(auxiliary = %auxiliary.addon_id(), error = %err, "Auxiliary module failed to deactivate");
            errors.push(err);
        }
        UnloadReport {
            addon_id: auxiliary.addon_id().to_string(),
            was_loaded,
            outstanding_refs: auxiliary.external_refs(),
            errors,
        }
    }
}
