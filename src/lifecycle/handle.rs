//! Module handles and the attribute model of an activated entry module

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::addon::metadata::AddonId;
use crate::addon::namespace::{Namespace, NamespaceValue};
use crate::core::error::{AddonError, Result};
use crate::core::utils::is_identifier;

/// Lifecycle state of an addon unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No module is active (initial state)
    Unloaded,
    /// The entry module has been activated
    Loaded,
}

/// Result of invoking a module callable
pub type CallResult = Result<Option<Attribute>>;

/// Invokable attribute of a module
#[derive(Clone)]
pub struct Callable(Arc<dyn Fn(&[Value]) -> CallResult + Send + Sync>);

impl Callable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        Callable(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> CallResult {
        (self.0)(args)
    }

    /// Call and require a plain value result; `None` becomes `Value::Null`
    pub fn call_value(&self, args: &[Value]) -> Result<Value> {
        match self.call(args)? {
            None => Ok(Value::Null),
            Some(Attribute::Value(value)) => Ok(value),
            Some(other) => Err(AddonError::Attribute(format!(
                "callable returned {} instead of a value",
                other.kind()
            ))),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable")
    }
}

/// A named member of an activated module
#[derive(Clone)]
pub enum Attribute {
    /// Plain data
    Value(Value),
    /// Function exported by the module
    Callable(Callable),
    /// Host object, e.g. an injected namespace entry
    Object(NamespaceValue),
    /// Other module handles, returned by `on_load` hooks
    Modules(Vec<ModuleHandle>),
}

impl Attribute {
    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Value(_) => "value",
            Attribute::Callable(_) => "callable",
            Attribute::Object(_) => "object",
            Attribute::Modules(_) => "modules",
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attribute::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Attribute::Callable(callable) => Some(callable),
            _ => None,
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Attribute::Callable(_) => f.write_str("Callable"),
            Attribute::Object(_) => f.write_str("Object"),
            Attribute::Modules(handles) => f.debug_tuple("Modules").field(handles).finish(),
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Attribute::Value(value)
    }
}

impl From<Callable> for Attribute {
    fn from(callable: Callable) -> Self {
        Attribute::Callable(callable)
    }
}

/// Activated entry module as seen by the lifecycle layer
pub trait AddonModule: Send + Sync {
    fn get(&self, name: &str) -> Option<Attribute>;

    fn set(&mut self, name: &str, value: Attribute) -> Result<()>;

    /// Names of every attribute currently defined
    fn names(&self) -> Vec<String>;

    /// Release resources held by the module; called once on unload or reload
    fn deactivate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Attribute map used as the execution context of in-process modules
///
/// Namespace entries are injected as [`Attribute::Object`] before the
/// module's entry function runs.
#[derive(Default, Clone, Debug)]
pub struct ModuleScope {
    attributes: BTreeMap<String, Attribute>,
}

impl ModuleScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope pre-populated with the entries of `namespace`
    pub fn with_namespace(namespace: &Namespace) -> Self {
        let attributes = namespace
            .iter()
            .map(|(name, value)| (name.to_string(), Attribute::Object(Arc::clone(value))))
            .collect();
        Self { attributes }
    }

    pub fn define_value(&mut self, name: &str, value: Value) -> Result<()> {
        self.set(name, Attribute::Value(value))
    }

    pub fn define_fn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        self.set(name, Attribute::Callable(Callable::new(f)))
    }

    /// Typed lookup of an injected namespace entry
    pub fn object<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.attributes.get(name) {
            Some(Attribute::Object(value)) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl AddonModule for ModuleScope {
    fn get(&self, name: &str) -> Option<Attribute> {
        self.attributes.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Attribute) -> Result<()> {
        if !is_identifier(name) {
            return Err(AddonError::Attribute(format!(
                "{:?} is not a valid attribute name",
                name
            )));
        }
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    fn deactivate(&mut self) -> Result<()> {
        self.attributes.clear();
        Ok(())
    }
}

/// Shared handle to an activated entry module
///
/// Clones share the same module; a reload swaps the module in place, so every
/// clone observes the new code. After unload the handle stays valid but
/// inactive: lookups return nothing.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    addon_id: AddonId,
    module_name: String,
    module: RwLock<Option<Box<dyn AddonModule>>>,
    generation: AtomicU64,
}

impl ModuleHandle {
    pub fn new(
        addon_id: impl Into<AddonId>,
        module_name: impl Into<String>,
        module: Box<dyn AddonModule>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                addon_id: addon_id.into(),
                module_name: module_name.into(),
                module: RwLock::new(Some(module)),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Identity shared by all clones of this handle
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn addon_id(&self) -> &str {
        &self.inner.addon_id
    }

    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    /// Incremented by every activation of the module
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    /// Number of clones of this handle besides the caller's own
    pub fn external_refs(&self) -> usize {
        Arc::strong_count(&self.inner).saturating_sub(1)
    }

    pub fn ptr_eq(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the active module; `None` once deactivated
    pub fn read<R>(&self, f: impl FnOnce(&dyn AddonModule) -> R) -> Option<R> {
        let guard = self.inner.module.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_deref().map(|module| f(module))
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut dyn AddonModule) -> R) -> Option<R> {
        let mut guard = self.inner.module.write().unwrap_or_else(PoisonError::into_inner);
        guard.as_deref_mut().map(|module| f(module))
    }

    /// Swap in a freshly activated module, returning the previous one
    pub(crate) fn replace(&self, module: Box<dyn AddonModule>) -> Option<Box<dyn AddonModule>> {
        let mut guard = self.inner.module.write().unwrap_or_else(PoisonError::into_inner);
        let previous = guard.replace(module);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        previous
    }

    /// Take the module out of the handle and deactivate it
    pub(crate) fn deactivate(&self) -> Result<()> {
        let module = self
            .inner
            .module
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match module {
            Some(mut module) => module.deactivate(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("addon_id", &self.inner.addon_id)
            .field("module", &self.inner.module_name)
            .field("generation", &self.generation())
            .finish()
    }
}

/// What a unit keeps while it is loaded
pub(crate) struct LoadedModule {
    pub(crate) handle: ModuleHandle,
    /// Effective namespace used for activation, reused by reload
    pub(crate) namespace: Namespace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_rejects_invalid_names() {
        let mut scope = ModuleScope::new();
        assert!(scope.define_value("ok_name", json!(1)).is_ok());
        assert!(matches!(
            scope.define_value("not-ok", json!(1)),
            Err(AddonError::Attribute(_))
        ));
        assert_eq!(scope.names(), vec!["ok_name"]);
    }

    #[test]
    fn test_scope_with_namespace() {
        let mut namespace = Namespace::new();
        namespace.set("greeting", String::from("hi"));

        let scope = ModuleScope::with_namespace(&namespace);
        assert_eq!(scope.object::<String>("greeting").as_deref().map(String::as_str), Some("hi"));
        assert!(scope.object::<u32>("greeting").is_none());
    }

    #[test]
    fn test_callable_results() {
        let double = Callable::new(|args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Some(Attribute::Value(json!(n * 2))))
        });
        assert_eq!(double.call_value(&[json!(21)]).unwrap(), json!(42));

        let nothing = Callable::new(|_| Ok(None));
        assert_eq!(nothing.call_value(&[]).unwrap(), Value::Null);

        let handles = Callable::new(|_| Ok(Some(Attribute::Modules(Vec::new()))));
        assert!(matches!(handles.call_value(&[]), Err(AddonError::Attribute(_))));
    }

    #[test]
    fn test_handle_replace_and_deactivate() {
        let mut scope = ModuleScope::new();
        scope.define_value("version", json!(1)).unwrap();
        let handle = ModuleHandle::new("demo", "main", Box::new(scope));
        let observer = handle.clone();
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.external_refs(), 1);

        let mut next = ModuleScope::new();
        next.define_value("version", json!(2)).unwrap();
        assert!(handle.replace(Box::new(next)).is_some());

        let version = observer.read(|m| m.get("version")).flatten();
        assert_eq!(version.and_then(|a| a.as_value().cloned()), Some(json!(2)));
        assert_eq!(observer.generation(), 2);

        handle.deactivate().unwrap();
        assert!(!observer.is_active());
        assert!(observer.read(|m| m.names()).is_none());
        assert!(handle.ptr_eq(&observer));
    }
}
