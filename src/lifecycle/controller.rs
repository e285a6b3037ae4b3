//! Load, reload and unload of addon entry modules
//!
//! The controller does not serialize concurrent transitions on the same unit;
//! callers must hold one lock per addon id around `load`, `reload` and
//! `unload`. It never holds a lock while talking to an installer.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::activator::ModuleActivator;
use super::handle::{LifecycleState, LoadedModule, ModuleHandle};
use super::proxy::TypedProxy;
use crate::addon::namespace::Namespace;
use crate::addon::unit::AddonUnit;
use crate::core::error::{AddonError, Result};
use crate::resolver::{DependencyResolver, Installer};

/// What `unload` could and could not release
#[derive(Debug)]
pub struct UnloadReport {
    pub addon_id: String,
    /// False when the unit was already unloaded
    pub was_loaded: bool,
    /// Clones of the module handle still held elsewhere
    ///
    /// Holders keep an inactive handle: attribute lookups return nothing, but
    /// values and callables copied out of the module before the unload stay
    /// alive until they are dropped.
    pub outstanding_refs: usize,
    /// Failures raised by the module while it was deactivated
    pub errors: Vec<AddonError>,
}

impl UnloadReport {
    fn unloaded(addon_id: &str) -> Self {
        Self {
            addon_id: addon_id.to_string(),
            was_loaded: false,
            outstanding_refs: 0,
            errors: Vec::new(),
        }
    }

    /// True when deactivation succeeded and nothing outside the controller
    /// still referenced the module
    pub fn is_clean(&self) -> bool {
        self.outstanding_refs == 0 && self.errors.is_empty()
    }
}

/// Per-unit state machine: Unloaded -> Loaded -> Unloaded
pub struct LifecycleController {
    resolver: Arc<DependencyResolver>,
    activator: Arc<dyn ModuleActivator>,
}

impl LifecycleController {
    pub fn new(resolver: Arc<DependencyResolver>, activator: Arc<dyn ModuleActivator>) -> Self {
        Self {
            resolver,
            activator,
        }
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    pub fn state(&self, unit: &AddonUnit) -> LifecycleState {
        unit.state()
    }

    /// Activate the entry module of `unit`
    ///
    /// Requires satisfied dependencies: with an installer the resolver is
    /// asked (cached verdicts are reused), without one a cached satisfied
    /// verdict must exist unless the unit declares no dependencies. The
    /// namespace passed to the module is the unit's namespace with
    /// `overrides` applied on top. Loading an already loaded unit returns the
    /// existing handle.
    pub fn load(
        &self,
        unit: &AddonUnit,
        installer: Option<&dyn Installer>,
        overrides: Option<&Namespace>,
    ) -> Result<ModuleHandle> {
        if let Some(handle) = unit.module() {
            debug!(addon_id = %unit.id(), "Addon already loaded");
            return Ok(handle);
        }

        self.ensure_dependencies(unit, installer)?;

        let namespace = match overrides {
            Some(overrides) => unit.namespace().merged(overrides),
            None => unit.namespace(),
        };

        // Entry code may inspect the unit, so no unit lock is held while it runs
        let module_name = unit.read_metadata().module.clone();
        let module = self.activator.activate(unit, &namespace).map_err(|e| {
            warn!(addon_id = %unit.id(), error = %e, "Module activation failed");
            e
        })?;
        let handle = ModuleHandle::new(unit.id(), module_name, module);

        let mut runtime = unit.runtime();
        if let Some(loaded) = runtime.as_ref() {
            // Lost a race with another load; callers are expected to serialize
            warn!(addon_id = %unit.id(), "Concurrent load detected, keeping the first module");
            let existing = loaded.handle.clone();
            drop(runtime);
            if let Err(err) = handle.deactivate() {
                warn!(addon_id = %unit.id(), error = %err, "Discarded module failed to deactivate");
            }
            return Ok(existing);
        }
        *runtime = Some(LoadedModule {
            handle: handle.clone(),
            namespace,
        });
        drop(runtime);

        info!(addon_id = %unit.id(), module = handle.module_name(), "Addon loaded");
        Ok(handle)
    }

    /// Re-run the entry module in place with the namespace used by `load`
    ///
    /// Every clone of the handle observes the new module. Dependencies are not
    /// checked again. Fails with `InvalidState` if the unit is not loaded; a
    /// failed reactivation leaves the previous module active.
    pub fn reload(&self, unit: &AddonUnit) -> Result<ModuleHandle> {
        let (handle, namespace) = {
            let runtime = unit.runtime();
            let loaded = runtime.as_ref().ok_or_else(|| {
                AddonError::InvalidState(format!("addon {} is not loaded", unit.id()))
            })?;
            (loaded.handle.clone(), loaded.namespace.clone())
        };

        let module = self.activator.reactivate(unit, &namespace)?;
        if let Some(mut previous) = handle.replace(module) {
            if let Err(err) = previous.deactivate() {
                warn!(addon_id = %unit.id(), error = %err, "Previous module failed to deactivate");
            }
        }

        info!(
            addon_id = %unit.id(),
            generation = handle.generation(),
            "Addon reloaded"
        );
        Ok(handle)
    }

    /// Deactivate the entry module and return to Unloaded
    ///
    /// Best effort: the unit is Unloaded afterwards even if deactivation
    /// reports an error, which is recorded in the report instead of being
    /// returned. The controller cannot reclaim clones of the handle or objects
    /// obtained from the module that callers still hold; the report counts
    /// those outstanding handle clones. Unloading an unloaded unit does
    /// nothing.
    pub fn unload(&self, unit: &AddonUnit) -> UnloadReport {
        let loaded = unit.runtime().take();
        let Some(loaded) = loaded else {
            debug!(addon_id = %unit.id(), "Unload requested for unloaded addon");
            return UnloadReport::unloaded(unit.id());
        };

        let handle = loaded.handle;
        let mut report = UnloadReport::unloaded(unit.id());
        report.was_loaded = true;
        if let Err(err) = handle.deactivate() {
            warn!(addon_id = %unit.id(), error = %err, "Module failed to deactivate");
            report.errors.push(err);
        }
        report.outstanding_refs = handle.external_refs();

        if report.outstanding_refs == 0 {
            info!(addon_id = %unit.id(), "Addon unloaded");
        } else {
            warn!(
                addon_id = %unit.id(),
                outstanding_refs = report.outstanding_refs,
                "Addon unloaded while module handles are still held"
            );
        }
        report
    }

    /// Typed access to the loaded module of `unit`
    pub fn proxy(&self, unit: &AddonUnit) -> Result<TypedProxy> {
        unit.module()
            .map(TypedProxy::new)
            .ok_or_else(|| AddonError::InvalidState(format!("addon {} is not loaded", unit.id())))
    }

    fn ensure_dependencies(&self, unit: &AddonUnit, installer: Option<&dyn Installer>) -> Result<()> {
        let verdict = match installer {
            Some(installer) => self.resolver.verdict(unit, installer)?,
            None => match self.resolver.cached_verdict(unit) {
                Some(verdict) => verdict,
                None if unit.read_metadata().depends.is_empty() => return Ok(()),
                None => return Err(AddonError::MissingInstaller(unit.id().to_string())),
            },
        };

        if verdict.satisfied {
            Ok(())
        } else {
            Err(AddonError::UnsatisfiedDependency {
                id: unit.id().to_string(),
                unsatisfied: verdict.unsatisfied,
            })
        }
    }
}
