#![allow(dead_code)]

use addon_system::core::error::InstallError;
use addon_system::Installer;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Installer double that counts every call
#[derive(Default)]
pub struct CountingInstaller {
    installed: Mutex<HashSet<String>>,
    broken: HashSet<String>,
    queries: Mutex<HashMap<String, usize>>,
    installs: AtomicUsize,
}

impl CountingInstaller {
    pub fn new(installed: &[&str]) -> Self {
        let installer = Self::default();
        installer
            .installed
            .lock()
            .unwrap()
            .extend(installed.iter().map(|n| n.to_string()));
        installer
    }

    pub fn broken(mut self, names: &[&str]) -> Self {
        self.broken.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// `is_satisfied` calls for `name`
    pub fn queries_for(&self, name: &str) -> usize {
        self.queries.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_queries(&self) -> usize {
        self.queries.lock().unwrap().values().sum()
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.installed.lock().unwrap().contains(name)
    }
}

impl Installer for CountingInstaller {
    fn is_satisfied(&self, name: &str, _constraint: &str) -> bool {
        *self.queries.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.is_installed(name)
    }

    fn install(&self, name: &str, constraint: &str) -> Result<(), InstallError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(name) {
            return Err(InstallError::new(name, constraint, "no matching distribution"));
        }
        self.installed.lock().unwrap().insert(name.to_string());
        Ok(())
    }
}

pub fn declaration(id: &str, name: &str, depends: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "module": "main",
        "authors": ["Ada Lovelace"],
        "version": "1.0.0",
        "description": format!("The {} addon", name),
        "depends": depends,
    })
}

/// Write `declaration` into `root/dir/addon.json`
pub fn write_addon(root: &Path, dir: &str, declaration: &Value) -> PathBuf {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(
        path.join("addon.json"),
        serde_json::to_string_pretty(declaration).unwrap(),
    )
    .unwrap();
    path
}
