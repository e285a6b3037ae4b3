//! Addon declaration file model
//!
//! Every addon directory carries a JSON declaration naming the addon, its entry
//! module and its dependencies. Loading is strict about the required keys;
//! saving writes the whole declaration through a temp file so the previous
//! version survives a failed write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::{AddonError, Result};
use crate::core::utils::{digest_strings, write_json_atomic};

/// Unique identifier of an addon within a registry
pub type AddonId = String;

/// Addon metadata
///
/// Snapshot of the declaration file. Changes only reach disk through
/// [`Metadata::save`] or [`Metadata::save_as`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Addon id (unique within a registry)
    pub id: AddonId,

    /// Human readable name
    pub name: String,

    /// Entry module inside the addon directory
    pub module: String,

    /// Authors, in declaration order
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Dependency entries such as `requests==2.31.0`
    #[serde(default)]
    pub depends: Vec<String>,

    /// Free-form section for addon specific settings, see [`crate::addon::extra`]
    #[serde(default)]
    pub extra: Map<String, Value>,

    /// Keys this version does not know about, written back untouched on save
    #[serde(flatten)]
    pub other: Map<String, Value>,

    #[serde(skip)]
    source: Option<PathBuf>,
}

impl Metadata {
    /// Create metadata for a new addon with no declaration file yet
    pub fn new(
        id: impl Into<AddonId>,
        name: impl Into<String>,
        module: impl Into<String>,
        authors: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            module: module.into(),
            authors,
            version: None,
            description: None,
            depends: Vec::new(),
            extra: Map::new(),
            other: Map::new(),
            source: None,
        }
    }

    pub fn with_depends(mut self, depends: Vec<String>) -> Self {
        self.depends = depends;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Load and validate a declaration file
    ///
    /// Fails with `MalformedMetadata` if the file is missing, is not a JSON
    /// object, lacks `id`, `name`, `module` or `authors`, or has an empty id or
    /// module.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AddonError::malformed(path, "declaration file not found"));
            }
            Err(e) => return Err(AddonError::malformed(path, e.to_string())),
        };

        let mut metadata: Metadata = serde_json::from_str(&contents)
            .map_err(|e| AddonError::malformed(path, e.to_string()))?;

        if metadata.id.trim().is_empty() {
            return Err(AddonError::malformed(path, "id cannot be empty"));
        }
        if metadata.module.trim().is_empty() {
            return Err(AddonError::malformed(path, "module cannot be empty"));
        }

        metadata.source = Some(path.to_path_buf());
        Ok(metadata)
    }

    /// Write the declaration back to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        match &self.source {
            Some(path) => write_json_atomic(path, self),
            None => Err(AddonError::InvalidState(format!(
                "metadata of {} has no declaration file; use save_as",
                self.id
            ))),
        }
    }

    /// Write the declaration to `path` and remember it for later saves
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    /// Declaration file backing this snapshot, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Digest of the depends list, used to tie verdicts to a snapshot
    pub fn depends_digest(&self) -> String {
        digest_strings(&self.depends)
    }
}
