//! Native dynamic library activation
//!
//! An addon whose entry module is a dynamic library (.so, .dylib, .dll) must
//! export this C interface:
//!
//! ```c
//! // Names of the callable attributes, as a JSON array of strings
//! char* addon_exports(void);
//! // Invoke `name` with a JSON array of arguments, writing a JSON result
//! int addon_invoke(const char* name, const char* args, char** result);
//! // Release strings returned by the two functions above
//! void addon_free(char* ptr);
//! ```
//!
//! Optional exports: `int addon_init(const char* namespace_json)` runs as the
//! module's top-level code on every activation, `void addon_shutdown(void)`
//! undoes it.
//!
//! A library file is mapped once per process, so every module activated from
//! it shares the same globals. `addon_shutdown` therefore runs when the last
//! live module of a library is deactivated, and on reload right before
//! `addon_init` runs again. A module replaced by a reload is retired without a
//! second shutdown. If `addon_init` fails during a reload the previous module
//! stays in place but has already been shut down.
//!
//! Every callable keeps the library alive, so the library is only unmapped once
//! the module and all callables taken from it are dropped.

use libloading::{Library, Symbol};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::activator::ModuleActivator;
use super::handle::{AddonModule, Attribute, Callable};
use crate::addon::namespace::Namespace;
use crate::addon::unit::AddonUnit;
use crate::core::error::{AddonError, Result};
use crate::core::utils::is_identifier;

type ExportsFn = unsafe extern "C" fn() -> *mut c_char;
type InvokeFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut *mut c_char) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_char);
type InitFn = unsafe extern "C" fn(*const c_char) -> c_int;
type ShutdownFn = unsafe extern "C" fn();

/// Live module count per library file
static LIVE_MODULES: Mutex<BTreeMap<PathBuf, Arc<Mutex<usize>>>> = Mutex::new(BTreeMap::new());

fn live_modules(path: &Path) -> Arc<Mutex<usize>> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut libraries = LIVE_MODULES.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(libraries.entry(key).or_default())
}

/// Activator loading entry modules with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeActivator;

impl NativeActivator {
    pub fn new() -> Self {
        Self
    }

    /// Open and initialize the library; with `restart` the state left by a
    /// live module of the same library is shut down first
    fn start(
        &self,
        unit: &AddonUnit,
        namespace: &Namespace,
        restart: bool,
    ) -> Result<Box<dyn AddonModule>> {
        let path = unit.module_path();
        let library = Arc::new(NativeLibrary::open(&path)?);

        // Held across init so activations of one library do not interleave
        let live = live_modules(&path);
        let mut count = live.lock().unwrap_or_else(PoisonError::into_inner);
        if restart && *count > 0 {
            library.shutdown();
        }
        library.init(&namespace_to_json(namespace))?;
        let exports = match library.exports() {
            Ok(exports) => exports,
            Err(err) => {
                if *count == 0 {
                    library.shutdown();
                }
                return Err(err);
            }
        };
        *count += 1;
        let live_count = *count;
        drop(count);

        tracing::info!(
            addon_id = %unit.id(),
            path = ?path,
            exports = exports.len(),
            live = live_count,
            restart,
            "Native module activated"
        );

        let mut overlay = BTreeMap::new();
        for (name, value) in namespace.iter() {
            overlay.insert(name.to_string(), Attribute::Object(Arc::clone(value)));
        }

        Ok(Box::new(NativeModule {
            library,
            exports,
            overlay,
            live: Some(live),
        }))
    }
}

impl ModuleActivator for NativeActivator {
    fn activate(&self, unit: &AddonUnit, namespace: &Namespace) -> Result<Box<dyn AddonModule>> {
        self.start(unit, namespace, false)
    }

    fn reactivate(&self, unit: &AddonUnit, namespace: &Namespace) -> Result<Box<dyn AddonModule>> {
        self.start(unit, namespace, true)
    }
}

/// A loaded library and its required symbols
struct NativeLibrary {
    library: Library,
    path: PathBuf,
}

impl NativeLibrary {
    fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AddonError::ModuleLoad(format!(
                "Library file not found: {:?}",
                path
            )));
        }

        if !has_library_extension(path) {
            return Err(AddonError::ModuleLoad(format!(
                "Invalid library file extension: {:?}",
                path
            )));
        }

        // SAFETY: loading runs the library's initializers; addons are trusted
        // at host level
        let library = unsafe {
            Library::new(path).map_err(|e| {
                AddonError::ModuleLoad(format!("Failed to load library {:?}: {}", path, e))
            })?
        };

        let native = Self {
            library,
            path: path.to_path_buf(),
        };
        for required in ["addon_exports", "addon_invoke", "addon_free"] {
            if !native.has_symbol(required) {
                return Err(AddonError::ModuleLoad(format!(
                    "Library {:?} does not export {}",
                    path, required
                )));
            }
        }
        Ok(native)
    }

    fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: the symbol is only looked up, never called through this type
        unsafe { self.library.get::<*const ()>(name.as_bytes()).is_ok() }
    }

    fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>> {
        // SAFETY: callers name one of the documented exports with its signature
        unsafe {
            self.library.get(name.as_bytes()).map_err(|e| {
                AddonError::ModuleLoad(format!(
                    "Symbol {} not found in {:?}: {}",
                    name, self.path, e
                ))
            })
        }
    }

    fn init(&self, namespace: &Value) -> Result<()> {
        if !self.has_symbol("addon_init") {
            return Ok(());
        }
        let init: Symbol<InitFn> = self.symbol("addon_init")?;
        let json = CString::new(namespace.to_string())
            .map_err(|e| AddonError::ModuleLoad(format!("Invalid namespace JSON: {}", e)))?;

        // SAFETY: `json` outlives the call
        let code = unsafe { init(json.as_ptr()) };
        if code != 0 {
            return Err(AddonError::ModuleLoad(format!(
                "addon_init of {:?} returned error code {}",
                self.path, code
            )));
        }
        Ok(())
    }

    fn exports(&self) -> Result<Vec<String>> {
        let exports: Symbol<ExportsFn> = self.symbol("addon_exports")?;
        // SAFETY: the returned string is owned by the library and released below
        let raw = unsafe { exports() };
        let json = self.take_string(raw)?;

        let names: Vec<String> = serde_json::from_str(&json).map_err(|e| {
            AddonError::ModuleLoad(format!("addon_exports returned invalid JSON: {}", e))
        })?;
        Ok(names.into_iter().filter(|name| is_identifier(name)).collect())
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        let invoke: Symbol<InvokeFn> = self.symbol("addon_invoke")?;
        let name_c = CString::new(name)
            .map_err(|e| AddonError::Attribute(format!("Invalid function name: {}", e)))?;
        let args_c = CString::new(Value::Array(args.to_vec()).to_string())
            .map_err(|e| AddonError::Attribute(format!("Invalid arguments: {}", e)))?;

        let mut result: *mut c_char = std::ptr::null_mut();
        // SAFETY: both strings outlive the call and `result` is a valid out pointer
        let code = unsafe { invoke(name_c.as_ptr(), args_c.as_ptr(), &mut result) };

        let output = if result.is_null() {
            None
        } else {
            Some(self.take_string(result)?)
        };

        if code != 0 {
            tracing::warn!(path = ?self.path, function = name, code, "Native call returned error code");
            return Err(AddonError::ModuleLoad(format!(
                "{} returned error code {}{}",
                name,
                code,
                output.map(|o| format!(": {}", o)).unwrap_or_default()
            )));
        }

        match output {
            Some(json) if !json.is_empty() => serde_json::from_str(&json).map_err(|e| {
                AddonError::Serialization(format!("Failed to parse result of {}: {}", name, e))
            }),
            _ => Ok(Value::Null),
        }
    }

    /// Copy a library-owned string and hand it back to `addon_free`
    fn take_string(&self, raw: *mut c_char) -> Result<String> {
        if raw.is_null() {
            return Err(AddonError::ModuleLoad(format!(
                "{:?} returned a null string",
                self.path
            )));
        }
        // SAFETY: non-null strings returned by the library are NUL terminated
        let copied = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        let free: Symbol<FreeFn> = self.symbol("addon_free")?;
        // SAFETY: `raw` came from this library and is released exactly once
        unsafe { free(raw) };
        Ok(copied)
    }

    fn shutdown(&self) {
        if !self.has_symbol("addon_shutdown") {
            return;
        }
        if let Ok(shutdown) = self.symbol::<ShutdownFn>("addon_shutdown") {
            // SAFETY: documented export without arguments
            unsafe { shutdown() };
        }
    }
}

struct NativeModule {
    library: Arc<NativeLibrary>,
    exports: Vec<String>,
    /// Attributes set by the host; they shadow exports of the same name
    overlay: BTreeMap<String, Attribute>,
    /// Live count of the library, taken on deactivation
    live: Option<Arc<Mutex<usize>>>,
}

impl AddonModule for NativeModule {
    fn get(&self, name: &str) -> Option<Attribute> {
        if let Some(attribute) = self.overlay.get(name) {
            return Some(attribute.clone());
        }
        if !self.exports.iter().any(|export| export == name) {
            return None;
        }

        let library = Arc::clone(&self.library);
        let function = name.to_string();
        Some(Attribute::Callable(Callable::new(move |args| {
            library.invoke(&function, args).map(|value| Some(Attribute::Value(value)))
        })))
    }

    fn set(&mut self, name: &str, value: Attribute) -> Result<()> {
        if !is_identifier(name) {
            return Err(AddonError::Attribute(format!(
                "{:?} is not a valid attribute name",
                name
            )));
        }
        self.overlay.insert(name.to_string(), value);
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.overlay.keys().cloned().collect();
        for export in &self.exports {
            if !self.overlay.contains_key(export) {
                names.push(export.clone());
            }
        }
        names.sort();
        names
    }

    fn deactivate(&mut self) -> Result<()> {
        if let Some(live) = self.live.take() {
            let mut count = live.lock().unwrap_or_else(PoisonError::into_inner);
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.library.shutdown();
            }
        }
        self.overlay.clear();
        self.exports.clear();
        tracing::debug!(
            path = ?self.library.path,
            outstanding = Arc::strong_count(&self.library) - 1,
            "Native module deactivated"
        );
        Ok(())
    }
}

/// Check the platform's dynamic library extension
fn has_library_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| ext == std::env::consts::DLL_EXTENSION)
}

/// JSON view of the namespace entries a C library can receive
///
/// Entries holding JSON values, strings, booleans or numbers are passed on;
/// other host objects are skipped.
pub fn namespace_to_json(namespace: &Namespace) -> Value {
    let mut map = Map::new();
    for (name, value) in namespace.iter() {
        let json = if let Some(v) = value.downcast_ref::<Value>() {
            v.clone()
        } else if let Some(v) = value.downcast_ref::<String>() {
            Value::from(v.as_str())
        } else if let Some(v) = value.downcast_ref::<&'static str>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<bool>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<i64>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<i32>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<u64>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<u32>() {
            Value::from(*v)
        } else if let Some(v) = value.downcast_ref::<f64>() {
            Value::from(*v)
        } else {
            tracing::debug!(name, "Namespace entry is not representable as JSON, skipping");
            continue;
        };
        map.insert(name.to_string(), json);
    }
    Value::Object(map)
}
