//! Addon System Library
//!
//! This library discovers addons below a root directory, resolves their
//! declared dependencies through a pluggable installer and drives the load,
//! reload and unload of their entry modules.

pub mod addon;
pub mod core;
pub mod db;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod status;

// Re-export commonly used types
pub use crate::addon::{AddonId, AddonUnit, ExtraSchema, Metadata, Namespace};
pub use crate::core::{AddonError, Config, Result};
pub use lifecycle::{Interface, LifecycleController, LifecycleState, ModuleHandle, TypedProxy};
pub use registry::{Discovery, QueryFilter, Registry};
pub use resolver::{DependencyResolver, DependencyVerdict, Installer};
pub use status::StatusStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
