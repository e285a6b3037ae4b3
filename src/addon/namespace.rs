//! Values handed to an addon's entry module at activation time
//!
//! The host fills a [`Namespace`] per addon; the activator receives it
//! explicitly and nothing is ever installed into process-global state.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased namespace value
pub type NamespaceValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct Namespace {
    values: BTreeMap<String, NamespaceValue>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    /// Insert an already shared value without re-wrapping it
    pub fn set_shared(&mut self, name: impl Into<String>, value: NamespaceValue) {
        self.values.insert(name.into(), value);
    }

    /// Typed lookup; `None` if absent or stored with a different type
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_shared(&self, name: &str) -> Option<NamespaceValue> {
        self.values.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn pop(&mut self, name: &str) -> Option<NamespaceValue> {
        self.values.remove(name)
    }

    /// Copy every entry of `other` into this namespace, replacing existing keys
    pub fn update(&mut self, other: &Namespace) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), Arc::clone(value));
        }
    }

    /// New namespace with `overrides` applied on top of this one
    pub fn merged(&self, overrides: &Namespace) -> Namespace {
        let mut merged = self.clone();
        merged.update(overrides);
        merged
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NamespaceValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_get() {
        let mut namespace = Namespace::new();
        namespace.set("port", 8080u16);
        namespace.set("host", String::from("localhost"));

        assert_eq!(namespace.get::<u16>("port"), Some(&8080));
        assert_eq!(namespace.get::<String>("host").map(String::as_str), Some("localhost"));
        assert!(namespace.get::<u32>("port").is_none());
        assert!(namespace.get::<u16>("missing").is_none());
    }

    #[test]
    fn test_merged_overrides_win() {
        let mut base = Namespace::new();
        base.set("mode", "base");
        base.set("only_base", 1i32);

        let mut overrides = Namespace::new();
        overrides.set("mode", "override");

        let merged = base.merged(&overrides);
        assert_eq!(merged.get::<&str>("mode"), Some(&"override"));
        assert_eq!(merged.get::<i32>("only_base"), Some(&1));
        // The base is left untouched
        assert_eq!(base.get::<&str>("mode"), Some(&"base"));
    }

    #[test]
    fn test_pop_and_shared_values() {
        let shared: NamespaceValue = Arc::new(vec![1u8, 2, 3]);
        let mut namespace = Namespace::new();
        namespace.set_shared("bytes", Arc::clone(&shared));

        assert!(Arc::ptr_eq(&namespace.get_shared("bytes").unwrap(), &shared));
        assert!(namespace.pop("bytes").is_some());
        assert!(namespace.pop("bytes").is_none());
        assert!(namespace.is_empty());
    }

    #[test]
    fn test_debug_lists_keys() {
        let mut namespace = Namespace::new();
        namespace.set("b", 1u8);
        namespace.set("a", 2u8);
        assert_eq!(format!("{:?}", namespace), "{\"a\", \"b\"}");
        assert_eq!(namespace.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
