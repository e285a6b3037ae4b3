//! Activation backends for entry modules

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::handle::{AddonModule, ModuleScope};
use crate::addon::namespace::Namespace;
use crate::addon::unit::AddonUnit;
use crate::core::error::{AddonError, Result};

/// Turns an addon's entry module into a live [`AddonModule`]
///
/// Activation runs the module's top-level code with `namespace` available to
/// it. The controller serializes calls per unit.
pub trait ModuleActivator: Send + Sync {
    fn activate(&self, unit: &AddonUnit, namespace: &Namespace) -> Result<Box<dyn AddonModule>>;

    /// Activate again for a reload; the previous module is deactivated by the
    /// caller once this succeeds
    ///
    /// Backends whose modules share state across activations override this to
    /// reset that state before the new module starts.
    fn reactivate(&self, unit: &AddonUnit, namespace: &Namespace) -> Result<Box<dyn AddonModule>> {
        self.activate(unit, namespace)
    }
}

/// Top-level code of an in-process entry module
pub type EntryFn = Arc<dyn Fn(&AddonUnit, &mut ModuleScope) -> Result<()> + Send + Sync>;

/// Activator for entry modules compiled into the host
///
/// Entry functions are registered under the module name used in declarations.
/// Each activation builds a fresh [`ModuleScope`] holding the namespace and
/// runs the entry function against it.
#[derive(Default)]
pub struct BuiltinActivator {
    entries: RwLock<HashMap<String, EntryFn>>,
}

impl BuiltinActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the entry function for `module`, replacing any previous one
    pub fn register<F>(&self, module: impl Into<String>, entry: F)
    where
        F: Fn(&AddonUnit, &mut ModuleScope) -> Result<()> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.into(), Arc::new(entry));
    }

    pub fn is_registered(&self, module: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module)
    }
}

impl ModuleActivator for BuiltinActivator {
    fn activate(&self, unit: &AddonUnit, namespace: &Namespace) -> Result<Box<dyn AddonModule>> {
        let module = unit.read_metadata().module.clone();
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module)
            .cloned()
            .ok_or_else(|| {
                AddonError::ModuleLoad(format!(
                    "no entry function registered for module {:?} of {}",
                    module,
                    unit.id()
                ))
            })?;

        let mut scope = ModuleScope::with_namespace(namespace);
        // The registry lock is released before running addon code
        entry(unit, &mut scope)?;
        Ok(Box::new(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::metadata::Metadata;
    use serde_json::json;

    #[test]
    fn test_builtin_activation_sees_namespace() {
        let activator = BuiltinActivator::new();
        activator.register("main", |unit, scope| {
            let greeting = scope
                .object::<String>("greeting")
                .map(|g| g.to_string())
                .unwrap_or_default();
            scope.define_value("message", json!(format!("{} from {}", greeting, unit.id())))
        });
        assert!(activator.is_registered("main"));

        let unit = AddonUnit::new(Metadata::new("demo", "Demo", "main", vec![]), "/tmp/demo");
        let mut namespace = Namespace::new();
        namespace.set("greeting", String::from("hello"));

        let module = activator.activate(&unit, &namespace).unwrap();
        let message = module.get("message").unwrap();
        assert_eq!(message.as_value(), Some(&json!("hello from demo")));
        assert!(module.names().contains(&"greeting".to_string()));
    }

    #[test]
    fn test_unknown_module() {
        let activator = BuiltinActivator::new();
        let unit = AddonUnit::new(Metadata::new("demo", "Demo", "missing", vec![]), "/tmp/demo");
        assert!(matches!(
            activator.activate(&unit, &Namespace::new()),
            Err(AddonError::ModuleLoad(_))
        ));
    }
}
