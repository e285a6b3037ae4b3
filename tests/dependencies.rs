mod common;

use addon_system::core::error::AddonError;
use addon_system::status::MemoryStatusStore;
use addon_system::{DependencyResolver, Registry, StatusStore};
use common::{declaration, write_addon, CountingInstaller};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn check_hits_cache_until_depends_change() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(
        temp_dir.path(),
        "clock",
        &declaration("clock", "Clock", &["tzdata>=2023.3", "pytz==2024.1"]),
    );
    let registry = Registry::discover(temp_dir.path(), Arc::new(MemoryStatusStore::new()))
        .unwrap()
        .into_registry();
    let unit = registry.get("clock").unwrap();
    let resolver = DependencyResolver::new();
    let installer = CountingInstaller::new(&["tzdata", "pytz"]);

    assert!(resolver.check(&unit, &installer).unwrap());
    assert!(resolver.check(&unit, &installer).unwrap());
    assert_eq!(installer.queries_for("tzdata"), 1);
    assert_eq!(installer.queries_for("pytz"), 1);

    unit.metadata_mut().depends[1] = "pytz==2024.2".to_string();
    assert!(resolver.check(&unit, &installer).unwrap());
    assert_eq!(installer.queries_for("pytz"), 2);
    assert_eq!(installer.total_queries(), 4);
}

#[test]
fn satisfy_failure_reports_and_invalidates() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(
        temp_dir.path(),
        "radio",
        &declaration("radio", "Radio", &["alsa==1.2", "codec>=3", "mixer~=0.4"]),
    );
    let registry = Registry::discover(temp_dir.path(), Arc::new(MemoryStatusStore::new()))
        .unwrap()
        .into_registry();
    let unit = registry.get("radio").unwrap();
    let resolver = DependencyResolver::new();
    let installer = CountingInstaller::new(&[]).broken(&["codec"]);

    assert!(!resolver.check(&unit, &installer).unwrap());
    assert_eq!(installer.total_queries(), 3);

    match resolver.satisfy(&unit, &installer) {
        Err(AddonError::AggregateInstall(err)) => {
            assert_eq!(err.addon_id, "radio");
            assert_eq!(err.succeeded, vec!["alsa==1.2"]);
            assert_eq!(err.failed.len(), 1);
            assert_eq!(err.failed[0].name, "codec");
            assert_eq!(err.skipped, vec!["mixer~=0.4"]);
        }
        other => panic!("expected aggregate install error, got {:?}", other),
    }
    assert_eq!(installer.installs(), 2);
    assert!(resolver.cached_verdict(&unit).is_none());

    // The next check asks the installer again and sees the partial install
    let verdict = resolver.verdict(&unit, &installer).unwrap();
    assert_eq!(installer.total_queries(), 6);
    assert_eq!(verdict.unsatisfied, vec!["codec>=3", "mixer~=0.4"]);
}

#[test]
fn satisfy_success_still_invalidates() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "clock", &declaration("clock", "Clock", &["tzdata>=2023.3"]));
    let registry = Registry::discover(temp_dir.path(), Arc::new(MemoryStatusStore::new()))
        .unwrap()
        .into_registry();
    let unit = registry.get("clock").unwrap();
    let resolver = DependencyResolver::new();
    let installer = CountingInstaller::new(&[]);

    resolver.satisfy(&unit, &installer).unwrap();
    assert!(installer.is_installed("tzdata"));
    assert!(resolver.cached_verdict(&unit).is_none());
    assert!(resolver.check(&unit, &installer).unwrap());
}

#[test]
fn persisted_verdict_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "clock", &declaration("clock", "Clock", &["tzdata>=2023.3"]));
    let store: Arc<dyn StatusStore> = Arc::new(MemoryStatusStore::new());
    let installer = CountingInstaller::new(&["tzdata"]);

    {
        let registry = Registry::discover(temp_dir.path(), Arc::clone(&store))
            .unwrap()
            .into_registry();
        let resolver = DependencyResolver::with_store(Arc::clone(&store));
        assert!(resolver.check(&registry.get("clock").unwrap(), &installer).unwrap());
    }
    assert_eq!(installer.total_queries(), 1);

    let registry = Registry::discover(temp_dir.path(), Arc::clone(&store))
        .unwrap()
        .into_registry();
    let unit = registry.get("clock").unwrap();
    let resolver = DependencyResolver::with_store(Arc::clone(&store));
    assert!(resolver.cached_verdict(&unit).is_some());
    assert!(resolver.check(&unit, &installer).unwrap());
    assert_eq!(installer.total_queries(), 1);

    // A changed declaration makes the stored verdict stale
    unit.metadata_mut().depends.push("pytz==2024.1".to_string());
    assert!(resolver.cached_verdict(&unit).is_none());
}
