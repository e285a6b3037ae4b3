mod common;

use addon_system::addon::extra::{bind, ExtraSchema};
use addon_system::core::error::AddonError;
use addon_system::lifecycle::{
    Attribute, BuiltinActivator, Interface, LifecycleState, ModuleTracker,
};
use addon_system::status::MemoryStatusStore;
use addon_system::{AddonUnit, DependencyResolver, LifecycleController, Metadata, Namespace, Registry};
use common::{declaration, write_addon, CountingInstaller};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn controller() -> Arc<LifecycleController> {
    let activator = BuiltinActivator::new();
    activator.register("main", |unit, scope| {
        let greeting = scope
            .object::<String>("greeting")
            .map(|g| g.to_string())
            .unwrap_or_else(|| "hello".to_string());
        let id = unit.id().to_string();
        scope.define_fn("greet", move |args| {
            let who = args.first().and_then(Value::as_str).unwrap_or("world");
            Ok(Some(Attribute::Value(json!(format!("{} {} from {}", greeting, who, id)))))
        })
    });
    Arc::new(LifecycleController::new(
        Arc::new(DependencyResolver::new()),
        Arc::new(activator),
    ))
}

fn registry(temp_dir: &TempDir, depends: &[&str]) -> Registry {
    write_addon(temp_dir.path(), "clock", &declaration("clock", "Clock", depends));
    Registry::discover(temp_dir.path(), Arc::new(MemoryStatusStore::new()))
        .unwrap()
        .into_registry()
}

#[test]
fn unsatisfied_dependency_blocks_load() {
    let temp_dir = TempDir::new().unwrap();
    let registry = registry(&temp_dir, &["tzdata>=2023.3", "pytz==2024.1"]);
    let unit = registry.get("clock").unwrap();
    let controller = controller();
    let installer = CountingInstaller::new(&["tzdata"]);

    let err = controller.load(&unit, Some(&installer), None).unwrap_err();
    assert!(matches!(
        err,
        AddonError::UnsatisfiedDependency { ref unsatisfied, .. } if unsatisfied == &vec!["pytz==2024.1".to_string()]
    ));
    assert_eq!(unit.state(), LifecycleState::Unloaded);
    assert!(unit.module().is_none());
}

#[test]
fn load_call_and_unload() {
    let temp_dir = TempDir::new().unwrap();
    let registry = registry(&temp_dir, &["tzdata>=2023.3"]);
    let unit = registry.get("clock").unwrap();
    let controller = controller();
    let installer = CountingInstaller::new(&["tzdata"]);

    unit.namespace_mut().set("greeting", String::from("hi"));
    let mut overrides = Namespace::new();
    overrides.set("greeting", String::from("howdy"));

    controller.load(&unit, Some(&installer), Some(&overrides)).unwrap();
    let proxy = controller.proxy(&unit).unwrap();
    let greet = proxy.get_callable("greet").unwrap();
    assert_eq!(
        greet.call_value(&[json!("Ada")]).unwrap(),
        json!("howdy Ada from clock")
    );
    assert!(proxy.get_callable("missing").is_none());
    assert!(matches!(
        proxy.get_attribute("missing", None),
        Err(AddonError::Attribute(_))
    ));
    drop(proxy);

    let report = controller.unload(&unit);
    assert!(report.was_loaded);
    assert!(report.is_clean());
    assert_eq!(unit.state(), LifecycleState::Unloaded);

    // A callable taken out before the unload keeps working on its own
    assert_eq!(greet.call_value(&[]).unwrap(), json!("howdy world from clock"));
}

#[test]
fn unload_of_unloaded_unit_is_noop() {
    let controller = controller();
    let unit = AddonUnit::new(Metadata::new("idle", "Idle", "main", vec![]), "/tmp/idle");
    let first = controller.unload(&unit);
    let second = controller.unload(&unit);
    assert!(!first.was_loaded);
    assert!(!second.was_loaded);
    assert_eq!(unit.state(), LifecycleState::Unloaded);
}

#[test]
fn interface_runs_hooks() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(registry(&temp_dir, &[]));
    write_addon(temp_dir.path(), "helper", &declaration("helper", "Helper", &[]));
    registry.rescan().unwrap();

    let activator = BuiltinActivator::new();
    let helper_registry = Arc::clone(&registry);
    let hook_controller: Arc<std::sync::OnceLock<Arc<LifecycleController>>> =
        Arc::new(std::sync::OnceLock::new());
    let slot = Arc::clone(&hook_controller);
    activator.register("main", move |unit, scope| {
        if unit.id() != "clock" {
            return Ok(());
        }
        let registry = Arc::clone(&helper_registry);
        let slot = Arc::clone(&slot);
        scope.define_fn("on_load", move |_args| {
            let helper = registry.get("helper")?;
            let controller = slot.get().ok_or_else(|| AddonError::InvalidState("no controller".into()))?;
            let handle = controller.load(&helper, None, None)?;
            Ok(Some(Attribute::Modules(vec![handle])))
        })
    });
    let controller = Arc::new(LifecycleController::new(
        Arc::new(DependencyResolver::new()),
        Arc::new(activator),
    ));
    assert!(hook_controller.set(Arc::clone(&controller)).is_ok());

    let interface = Interface::new(
        Arc::clone(&controller),
        registry.get("clock").unwrap(),
        Arc::new(ModuleTracker::new()),
    )
    .with_registry(Arc::clone(&registry));

    interface.load(None, None, &[]).unwrap();
    let helper = registry.get("helper").unwrap();
    assert!(helper.is_loaded());

    let report = interface.unload(&[]);
    assert!(report.is_success(), "{:?}", report.errors);
    assert_eq!(report.auxiliary.len(), 1);
    assert_eq!(report.auxiliary[0].addon_id, "helper");
    assert!(!helper.is_loaded());
    assert!(!registry.get("clock").unwrap().is_loaded());
}

#[derive(Debug, Serialize, Deserialize)]
struct ClockSettings {
    interval: u32,
    format: String,
}

struct ClockSchema;

impl ExtraSchema for ClockSchema {
    type Fields = ClockSettings;

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("interval".into(), json!(60));
        defaults.insert("format".into(), json!("%H:%M"));
        defaults
    }

    fn validate(&self, raw: &Map<String, Value>) -> bool {
        raw.get("interval").map_or(true, Value::is_u64)
    }
}

#[test]
fn typed_extra_round_trip_through_registry() {
    let temp_dir = TempDir::new().unwrap();
    let registry = registry(&temp_dir, &[]);

    {
        let unit = registry.get("clock").unwrap();
        let mut metadata = unit.metadata_mut();
        let mut view = bind(&mut metadata, &ClockSchema).unwrap();
        assert_eq!(view.interval, 60);
        view.interval = 15;
        view.save().unwrap();
    }

    registry.rescan().unwrap();
    let unit = registry.get("clock").unwrap();
    let mut metadata = unit.metadata_mut();
    let view = bind(&mut metadata, &ClockSchema).unwrap();
    assert_eq!(view.interval, 15);
    assert_eq!(view.format, "%H:%M");
    drop(view);
    assert_eq!(metadata.extra.get("interval"), Some(&json!(15)));
    assert!(metadata.extra.get("format").is_none());

    metadata.extra.insert("interval".into(), json!("often"));
    assert!(matches!(
        bind(&mut metadata, &ClockSchema),
        Err(AddonError::Validation(_))
    ));
}
