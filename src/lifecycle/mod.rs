//! Module lifecycle
//!
//! This module drives the entry module of an addon through its states:
//! - Activation backends (in-process entry functions, native libraries)
//! - The per-unit load / reload / unload state machine
//! - Typed attribute access and hook-driven interfaces on loaded modules

pub mod activator;
pub mod controller;
pub mod handle;
pub mod interface;
pub mod native;
pub mod proxy;

pub use activator::{BuiltinActivator, EntryFn, ModuleActivator};
pub use controller::{LifecycleController, UnloadReport};
pub use handle::{AddonModule, Attribute, Callable, LifecycleState, ModuleHandle, ModuleScope};
pub use interface::{Interface, InterfaceUnloadReport, ModuleTracker};
pub use native::NativeActivator;
pub use proxy::TypedProxy;
