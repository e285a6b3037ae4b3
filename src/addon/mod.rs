//! Addon declarations and units
//!
//! This module provides the data side of an addon:
//! - The declaration file model and typed views of its extra section
//! - The namespace injected into entry modules
//! - Per-addon key/value storage
//! - The in-memory unit the registry indexes

pub mod extra;
pub mod metadata;
pub mod namespace;
pub mod storage;
pub mod unit;

pub use extra::{bind, ExtraSchema, ExtraView, JsonSchemaExtra};
pub use metadata::{AddonId, Metadata};
pub use namespace::{Namespace, NamespaceValue};
pub use storage::AddonStorage;
pub use unit::AddonUnit;
