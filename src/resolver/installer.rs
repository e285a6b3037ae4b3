//! Installer capability and depends entry parsing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{AddonError, InstallError, Result};

/// Characters that start the constraint part of a depends entry
const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!', '~'];

/// Package backend consulted for dependency entries
///
/// Both calls may block for a long time (process spawns, network). Callers
/// never hold a lock across them.
pub trait Installer: Send + Sync {
    /// Whether `name` is present in a version accepted by `constraint`
    fn is_satisfied(&self, name: &str, constraint: &str) -> bool;

    fn install(&self, name: &str, constraint: &str) -> std::result::Result<(), InstallError>;
}

/// One parsed depends entry
///
/// `requests>=2.0,<3` splits into the name `requests` and the constraint
/// `>=2.0,<3`; the constraint keeps its operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: String,
}

impl DependencySpec {
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let split = entry
            .find(OPERATOR_CHARS)
            .ok_or_else(|| AddonError::InvalidDependency(entry.to_string()))?;

        let (name, constraint) = entry.split_at(split);
        let name = name.trim();
        let constraint = constraint.trim();

        let has_version = constraint.trim_start_matches(OPERATOR_CHARS).trim();
        if name.is_empty() || has_version.is_empty() {
            return Err(AddonError::InvalidDependency(entry.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            constraint: constraint.to_string(),
        })
    }

    /// Parse every entry, failing on the first invalid one
    pub fn parse_all<S: AsRef<str>>(entries: &[S]) -> Result<Vec<Self>> {
        entries.iter().map(|e| Self::parse(e.as_ref())).collect()
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.constraint)
    }
}
