//! Typed access to the `extra` section of a declaration
//!
//! An [`ExtraSchema`] supplies defaults and a validation predicate for the raw
//! mapping. Binding a schema yields an [`ExtraView`] over the deserialized
//! fields; writes through the view reach the declaration only on
//! [`ExtraView::save`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

use super::metadata::Metadata;
use crate::core::error::{AddonError, Result};

/// Schema for the extra section of a declaration
pub trait ExtraSchema {
    /// Typed representation of the section
    type Fields: Serialize + DeserializeOwned;

    /// Values applied to keys missing from the raw mapping
    fn defaults(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Return true if the raw mapping is acceptable
    fn validate(&self, raw: &Map<String, Value>) -> bool;
}

/// Bind `schema` to the extra section of `metadata`
pub fn bind<'m, S: ExtraSchema>(
    metadata: &'m mut Metadata,
    schema: &S,
) -> Result<ExtraView<'m, S>> {
    ExtraView::bind(metadata, schema)
}

/// Typed view over a metadata's extra section
///
/// Mutable access marks the view dirty. Only fields whose serialized value
/// differs from the bound state are written back, so defaults that were never
/// touched stay out of the declaration file.
pub struct ExtraView<'m, S: ExtraSchema> {
    metadata: &'m mut Metadata,
    fields: S::Fields,
    baseline: Map<String, Value>,
    dirty: bool,
}

impl<'m, S: ExtraSchema> ExtraView<'m, S> {
    pub fn bind(metadata: &'m mut Metadata, schema: &S) -> Result<Self> {
        if !schema.validate(&metadata.extra) {
            return Err(AddonError::Validation(format!(
                "extra section of {} rejected by schema",
                metadata.id
            )));
        }

        let mut merged = schema.defaults();
        for (key, value) in &metadata.extra {
            merged.insert(key.clone(), value.clone());
        }

        let fields: S::Fields = serde_json::from_value(Value::Object(merged.clone()))
            .map_err(|e| {
                AddonError::Validation(format!("extra section of {}: {}", metadata.id, e))
            })?;

        let baseline = to_map(&fields)?;
        if let Some(key) = baseline.keys().find(|key| !merged.contains_key(*key)) {
            return Err(AddonError::Validation(format!(
                "extra field {:?} of {} has neither a default nor a stored value",
                key, metadata.id
            )));
        }

        Ok(Self {
            metadata,
            fields,
            baseline,
            dirty: false,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Copy changed fields into the raw mapping and save the declaration
    pub fn save(&mut self) -> Result<()> {
        if self.dirty {
            let current = to_map(&self.fields)?;
            for (key, value) in &current {
                if self.baseline.get(key) != Some(value) {
                    self.metadata.extra.insert(key.clone(), value.clone());
                }
            }
            self.baseline = current;
            self.dirty = false;
        }
        self.metadata.save()
    }
}

impl<S: ExtraSchema> Deref for ExtraView<'_, S> {
    type Target = S::Fields;

    fn deref(&self) -> &Self::Target {
        &self.fields
    }
}

impl<S: ExtraSchema> DerefMut for ExtraView<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty = true;
        &mut self.fields
    }
}

fn to_map<T: Serialize>(fields: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(map),
        other => Err(AddonError::Validation(format!(
            "extra fields must serialize to an object, got {}",
            other
        ))),
    }
}

/// Schema described by a JSON Schema document
///
/// `validate` runs the compiled schema over the raw mapping and `defaults`
/// collects the `default` of each top-level property.
pub struct JsonSchemaExtra {
    schema: Value,
    compiled: jsonschema::JSONSchema,
}

impl JsonSchemaExtra {
    pub fn new(schema: Value) -> Result<Self> {
        let compiled = jsonschema::JSONSchema::compile(&schema).map_err(|e| {
            AddonError::Validation(format!("Invalid extra schema: {}", e))
        })?;
        Ok(Self { schema, compiled })
    }

    /// Validation messages for `raw`, empty when it is accepted
    pub fn errors(&self, raw: &Map<String, Value>) -> Vec<String> {
        let instance = Value::Object(raw.clone());
        let messages = match self.compiled.validate(&instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| e.to_string()).collect(),
        };
        messages
    }
}

impl ExtraSchema for JsonSchemaExtra {
    type Fields = Map<String, Value>;

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        if let Some(properties) = self.schema.get("properties").and_then(|p| p.as_object()) {
            for (name, property) in properties {
                if let Some(default) = property.get("default") {
                    defaults.insert(name.clone(), default.clone());
                }
            }
        }
        defaults
    }

    fn validate(&self, raw: &Map<String, Value>) -> bool {
        let instance = Value::Object(raw.clone());
        let valid = self.compiled.is_valid(&instance);
        if !valid {
            tracing::debug!(errors = ?self.errors(raw), "Extra section failed schema validation");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize)]
    struct Display {
        theme: String,
        refresh_secs: u32,
    }

    struct DisplaySchema;

    impl ExtraSchema for DisplaySchema {
        type Fields = Display;

        fn defaults(&self) -> Map<String, Value> {
            let mut defaults = Map::new();
            defaults.insert("theme".into(), json!("light"));
            defaults.insert("refresh_secs".into(), json!(60));
            defaults
        }

        fn validate(&self, raw: &Map<String, Value>) -> bool {
            raw.get("refresh_secs").map_or(true, |v| v.is_u64())
        }
    }

    fn metadata_in(dir: &TempDir, extra: Value) -> Metadata {
        let mut metadata = Metadata::new("display", "Display", "main", vec![]);
        metadata.extra = extra.as_object().unwrap().clone();
        metadata.save_as(&dir.path().join("addon.json")).unwrap();
        metadata
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut metadata = metadata_in(&temp_dir, json!({"theme": "dark"}));

        let view = bind(&mut metadata, &DisplaySchema).unwrap();
        assert_eq!(view.theme, "dark");
        assert_eq!(view.refresh_secs, 60);
        assert!(!view.is_dirty());
    }

    #[test]
    fn test_validation_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut metadata = metadata_in(&temp_dir, json!({"refresh_secs": "often"}));

        let result = bind(&mut metadata, &DisplaySchema);
        assert!(matches!(result, Err(AddonError::Validation(_))));
    }

    #[test]
    fn test_wrong_type_is_not_coerced() {
        struct Lenient;
        impl ExtraSchema for Lenient {
            type Fields = Display;
            fn validate(&self, _raw: &Map<String, Value>) -> bool {
                true
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let mut metadata =
            metadata_in(&temp_dir, json!({"theme": 3, "refresh_secs": 10}));
        assert!(matches!(
            bind(&mut metadata, &Lenient),
            Err(AddonError::Validation(_))
        ));
    }

    #[test]
    fn test_save_writes_only_changed_fields() {
        let temp_dir = TempDir::new().unwrap();
        let mut metadata = metadata_in(&temp_dir, json!({"theme": "dark"}));

        {
            let mut view = bind(&mut metadata, &DisplaySchema).unwrap();
            view.theme = "solarized".into();
            assert!(view.is_dirty());
            view.save().unwrap();
            assert!(!view.is_dirty());
        }

        let path = temp_dir.path().join("addon.json");
        let reloaded = Metadata::load(&path).unwrap();
        assert_eq!(reloaded.extra["theme"], "solarized");
        assert!(!reloaded.extra.contains_key("refresh_secs"));
    }

    #[test]
    fn test_bind_mutate_save_reload_bind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("addon.json");
        let mut metadata = metadata_in(&temp_dir, json!({}));

        {
            let mut view = bind(&mut metadata, &DisplaySchema).unwrap();
            view.theme = "dark".into();
            view.refresh_secs = 5;
            view.save().unwrap();
        }

        let mut reloaded = Metadata::load(&path).unwrap();
        let view = bind(&mut reloaded, &DisplaySchema).unwrap();
        assert_eq!(view.theme, "dark");
        assert_eq!(view.refresh_secs, 5);
    }

    #[test]
    fn test_json_schema_extra() {
        let schema = JsonSchemaExtra::new(json!({
            "type": "object",
            "properties": {
                "endpoint": {"type": "string"},
                "retries": {"type": "integer", "minimum": 0, "default": 3}
            },
            "required": ["endpoint"]
        }))
        .unwrap();

        let temp_dir = TempDir::new().unwrap();
        let mut metadata = metadata_in(&temp_dir, json!({"endpoint": "https://api"}));
        {
            let mut view = bind(&mut metadata, &schema).unwrap();
            assert_eq!(view["retries"], 3);
            view.insert("retries".into(), json!(5));
            view.save().unwrap();
        }
        assert_eq!(metadata.extra["retries"], 5);

        let mut invalid = metadata_in(&temp_dir, json!({"retries": -1}));
        assert!(!schema.errors(&invalid.extra).is_empty());
        assert!(matches!(
            bind(&mut invalid, &schema),
            Err(AddonError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_json_schema() {
        let result = JsonSchemaExtra::new(json!({"type": 12}));
        assert!(matches!(result, Err(AddonError::Validation(_))));
    }
}
