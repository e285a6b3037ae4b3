//! Attribute index and query filters

use std::collections::HashMap;
use std::sync::Arc;

use crate::addon::metadata::{AddonId, Metadata};
use crate::addon::unit::AddonUnit;
use crate::core::utils::{contains, equals};

/// Independently optional predicates, ANDed together
///
/// String filters are substring matches except `author`, which must equal
/// one of the addon's authors. `ignore_case` applies to every string filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub author: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub ignore_case: bool,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.name.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
    }
}

/// Queryable fields captured when the index is built
struct Fields {
    name: String,
    description: Option<String>,
    authors: Vec<String>,
}

impl Fields {
    fn capture(metadata: &Metadata) -> Self {
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            authors: metadata.authors.clone(),
        }
    }
}

struct Entry {
    unit: Arc<AddonUnit>,
    fields: Fields,
}

/// Immutable snapshot of the registry contents
///
/// Rebuilt on every scan and swapped in whole; string fields reflect the
/// metadata at build time, the enabled flag is read live from the unit.
#[derive(Default)]
pub(crate) struct Index {
    entries: Vec<Entry>,
    by_id: HashMap<AddonId, usize>,
    /// Lowercased author -> entry positions
    by_author: HashMap<String, Vec<usize>>,
}

impl Index {
    /// Build from units in discovery order; ids must already be unique
    pub(crate) fn build(units: Vec<Arc<AddonUnit>>) -> Self {
        let mut index = Index::default();
        for unit in units {
            let position = index.entries.len();
            let fields = Fields::capture(&unit.read_metadata());
            for author in &fields.authors {
                let positions = index.by_author.entry(author.to_lowercase()).or_default();
                if positions.last() != Some(&position) {
                    positions.push(position);
                }
            }
            index.by_id.insert(unit.id().to_string(), position);
            index.entries.push(Entry { unit, fields });
        }
        index
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Arc<AddonUnit>> {
        self.by_id.get(id).map(|&position| &self.entries[position].unit)
    }

    pub(crate) fn units(&self) -> Vec<Arc<AddonUnit>> {
        self.entries.iter().map(|entry| Arc::clone(&entry.unit)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy of this index without `id`
    pub(crate) fn without(&self, id: &str) -> Self {
        Index::build(
            self.entries
                .iter()
                .filter(|entry| entry.unit.id() != id)
                .map(|entry| Arc::clone(&entry.unit))
                .collect(),
        )
    }

    /// Matching units in discovery order
    pub(crate) fn query(&self, filter: &QueryFilter) -> Vec<Arc<AddonUnit>> {
        let candidates: Box<dyn Iterator<Item = &Entry> + '_> = match &filter.author {
            Some(author) => Box::new(
                self.by_author
                    .get(&author.to_lowercase())
                    .into_iter()
                    .flatten()
                    .map(|&position| &self.entries[position]),
            ),
            None => Box::new(self.entries.iter()),
        };

        candidates
            .filter(|entry| matches(entry, filter))
            .map(|entry| Arc::clone(&entry.unit))
            .collect()
    }
}

fn matches(entry: &Entry, filter: &QueryFilter) -> bool {
    let fields = &entry.fields;
    let ignore_case = filter.ignore_case;

    if let Some(author) = &filter.author {
        if !fields.authors.iter().any(|a| equals(a, author, ignore_case)) {
            return false;
        }
    }
    if let Some(name) = &filter.name {
        if !contains(&fields.name, name, ignore_case) {
            return false;
        }
    }
    if let Some(description) = &filter.description {
        match &fields.description {
            Some(text) if contains(text, description, ignore_case) => {}
            _ => return false,
        }
    }
    if let Some(enabled) = filter.enabled {
        if entry.unit.is_enabled() != enabled {
            return false;
        }
    }
    true
}
