//! Typed access to the attributes of a loaded module

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use super::handle::{Attribute, Callable, ModuleHandle};
use crate::core::error::{AddonError, Result};
use crate::core::utils::is_identifier;

/// Call proxy layered on a [`ModuleHandle`]
#[derive(Debug, Clone)]
pub struct TypedProxy {
    handle: ModuleHandle,
}

impl TypedProxy {
    pub fn new(handle: ModuleHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &ModuleHandle {
        &self.handle
    }

    /// Callable attribute `name`
    ///
    /// `None` when the name is not an identifier, the attribute is missing or
    /// not callable, or the module has been unloaded. Never fails.
    pub fn get_callable(&self, name: &str) -> Option<Callable> {
        if !is_identifier(name) {
            return None;
        }
        match self.handle.read(|module| module.get(name)).flatten()? {
            Attribute::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    /// Call `name` with `args`
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Attribute>> {
        let callable = self
            .get_callable(name)
            .ok_or_else(|| AddonError::Attribute(format!("{} is not a callable attribute", name)))?;
        callable.call(args)
    }

    /// Attribute `name`, or `default` when it is missing
    ///
    /// Fails with `Attribute` when the attribute is missing and no default is
    /// given, and with `InvalidState` once the module has been unloaded.
    pub fn get_attribute(&self, name: &str, default: Option<Attribute>) -> Result<Attribute> {
        let found = self
            .handle
            .read(|module| module.get(name))
            .ok_or_else(|| self.unloaded())?;

        match (found, default) {
            (Some(attribute), _) => Ok(attribute),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(AddonError::Attribute(name.to_string())),
        }
    }

    /// Deserialize the plain value attribute `name`
    pub fn get_value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        match self.get_attribute(name, None)? {
            Attribute::Value(value) => serde_json::from_value(value).map_err(|e| {
                AddonError::Attribute(format!("{} has an unexpected type: {}", name, e))
            }),
            other => Err(AddonError::Attribute(format!(
                "{} is a {}, not a value",
                name,
                other.kind()
            ))),
        }
    }

    /// Downcast the host object attribute `name`
    pub fn get_object<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        match self.get_attribute(name, None)? {
            Attribute::Object(object) => object.downcast::<T>().map_err(|_| {
                AddonError::Attribute(format!(
                    "{} is not a {}",
                    name,
                    std::any::type_name::<T>()
                ))
            }),
            other => Err(AddonError::Attribute(format!(
                "{} is a {}, not an object",
                name,
                other.kind()
            ))),
        }
    }

    /// Write several attributes, one at a time
    ///
    /// Not transactional: stops at the first failing write and keeps the
    /// attributes written before it.
    pub fn set_attributes<I, K>(&self, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Attribute)>,
        K: AsRef<str>,
    {
        for (name, value) in attributes {
            self.handle
                .write(|module| module.set(name.as_ref(), value))
                .ok_or_else(|| self.unloaded())??;
        }
        Ok(())
    }

    /// Names defined by the module, empty once unloaded
    pub fn names(&self) -> Vec<String> {
        self.handle.read(|module| module.names()).unwrap_or_default()
    }

    fn unloaded(&self) -> AddonError {
        AddonError::InvalidState(format!(
            "module of addon {} has been unloaded",
            self.handle.addon_id()
        ))
    }
}
