mod common;

use addon_system::core::error::AddonError;
use addon_system::status::{JsonStatusStore, MemoryStatusStore, SqliteStatusStore};
use addon_system::db::DatabaseManager;
use addon_system::{Metadata, QueryFilter, Registry, StatusStore};
use common::{declaration, write_addon};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn memory() -> Arc<dyn StatusStore> {
    Arc::new(MemoryStatusStore::new())
}

#[test]
fn discovered_metadata_matches_declaration_files() {
    let temp_dir = TempDir::new().unwrap();
    let mut declarations = Vec::new();
    for (dir, id, name) in [("clock", "clock", "Clock"), ("radio", "radio", "Radio")] {
        let mut value = declaration(id, name, &["tzdata>=2023.3"]);
        value["extra"] = json!({"interval": 5});
        value["homepage"] = json!("https://example.org");
        let path = write_addon(temp_dir.path(), dir, &value);
        declarations.push((id, path, value));
    }

    let registry = Registry::discover(temp_dir.path(), memory())
        .unwrap()
        .into_registry();

    for (id, path, value) in declarations {
        let unit = registry.get(id).unwrap();
        let metadata = unit.metadata();
        assert_eq!(metadata, Metadata::load(&path.join("addon.json")).unwrap());
        assert_eq!(serde_json::to_value(&metadata).unwrap(), value);
    }
}

#[test]
fn duplicate_ids_are_surfaced_and_first_stays_available() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "alpha", &declaration("shared", "First", &[]));
    write_addon(temp_dir.path(), "beta", &declaration("shared", "Second", &[]));

    let discovery = Registry::discover(temp_dir.path(), memory()).unwrap();
    let err = discovery.ensure_unique().unwrap_err();
    assert_eq!(err.error_type(), "DuplicateIdError");
    assert!(matches!(err, AddonError::DuplicateId { ref id, .. } if id == "shared"));

    let unit = discovery.registry.get("shared").unwrap();
    assert_eq!(unit.read_metadata().name, "First");
    assert_eq!(discovery.registry.len(), 1);
}

#[test]
fn case_insensitive_name_query() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "some", &declaration("some", "SomeAddon", &[]));
    write_addon(temp_dir.path(), "other", &declaration("other", "Other", &[]));

    let registry = Registry::discover(temp_dir.path(), memory())
        .unwrap()
        .into_registry();
    let found = registry.query(&QueryFilter::new().name("some").ignore_case(true));
    let ids: Vec<&str> = found.iter().map(|u| u.id()).collect();
    assert_eq!(ids, vec!["some"]);
}

#[test]
fn malformed_addon_does_not_break_discovery() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "good", &declaration("good", "Good", &[]));
    write_addon(temp_dir.path(), "nameless", &json!({"id": "nameless", "module": "main", "authors": []}));

    let discovery = Registry::discover(temp_dir.path(), memory()).unwrap();
    assert_eq!(discovery.registry.len(), 1);
    assert_eq!(discovery.report.skipped.len(), 1);
    assert_eq!(
        discovery.report.skipped[0].error.error_type(),
        "MalformedMetadataError"
    );
}

#[test]
fn enabled_flags_persist_in_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let addons = temp_dir.path().join("addons");
    write_addon(&addons, "clock", &declaration("clock", "Clock", &[]));
    let db_path = temp_dir.path().join("status.db");

    let open = || -> Arc<dyn StatusStore> {
        let db = DatabaseManager::new(&db_path, 2, Duration::from_secs(5)).unwrap();
        Arc::new(SqliteStatusStore::new(db))
    };

    {
        let registry = Registry::discover(&addons, open()).unwrap().into_registry();
        registry.enable("clock").unwrap();
    }

    let registry = Registry::discover(&addons, open()).unwrap().into_registry();
    assert!(registry.is_enabled("clock").unwrap());
}

#[test]
fn enabled_flags_persist_in_json_file() {
    let temp_dir = TempDir::new().unwrap();
    write_addon(temp_dir.path(), "clock", &declaration("clock", "Clock", &[]));
    let status = temp_dir.path().join(".addon-status.json");

    {
        let store = Arc::new(JsonStatusStore::open(&status).unwrap());
        let registry = Registry::discover(temp_dir.path(), store).unwrap().into_registry();
        let unit = registry.get("clock").unwrap();
        registry.set_enabled(&unit, true).unwrap();
    }

    // The status file sits in the root and is not mistaken for an addon
    let store = Arc::new(JsonStatusStore::open(&status).unwrap());
    let discovery = Registry::discover(temp_dir.path(), store).unwrap();
    assert!(discovery.report.is_clean());
    assert!(discovery.registry.is_enabled("clock").unwrap());
}
