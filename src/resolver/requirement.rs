//! Version constraint evaluation for installer backends
//!
//! Constraints use the comparison style of depends entries: `==`, `!=`, `>=`,
//! `<=`, `>`, `<` and `~=`, joined by commas. Versions with fewer than three
//! components are padded (`2.1` is `2.1.0`) and `==`/`!=` accept a trailing
//! `.*` wildcard.

use semver::Version;
use std::fmt;

use crate::core::error::{AddonError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    /// `~=`: at least this version, within the same release series
    Compatible,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Compatible => "~=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Operator,
    version: Version,
    /// Number of components written in the constraint
    precision: usize,
    wildcard: bool,
}

impl Clause {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        // Longest operators first so `>=` is not read as `>`
        let table = [
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            ("~=", Operator::Compatible),
            (">", Operator::Gt),
            ("<", Operator::Lt),
        ];
        let (op, rest) = table
            .iter()
            .find_map(|(symbol, op)| raw.strip_prefix(symbol).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| invalid(raw, "missing comparison operator"))?;

        let (rest, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (rest, false),
        };
        if wildcard && !matches!(op, Operator::Eq | Operator::Ne) {
            return Err(invalid(raw, "wildcards are only allowed with == and !="));
        }

        let (version, precision) = parse_version(rest).map_err(|message| invalid(raw, &message))?;
        if op == Operator::Compatible && precision < 2 {
            return Err(invalid(raw, "~= needs at least two version components"));
        }

        Ok(Self {
            op,
            version,
            precision,
            wildcard,
        })
    }

    fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Eq if self.wildcard => self.same_prefix(candidate, self.precision),
            Operator::Ne if self.wildcard => !self.same_prefix(candidate, self.precision),
            Operator::Eq => candidate == &self.version,
            Operator::Ne => candidate != &self.version,
            Operator::Ge => candidate >= &self.version,
            Operator::Le => candidate <= &self.version,
            Operator::Gt => candidate > &self.version,
            Operator::Lt => candidate < &self.version,
            Operator::Compatible => {
                candidate >= &self.version && self.same_prefix(candidate, self.precision - 1)
            }
        }
    }

    fn same_prefix(&self, candidate: &Version, components: usize) -> bool {
        let ours = [self.version.major, self.version.minor, self.version.patch];
        let theirs = [candidate.major, candidate.minor, candidate.patch];
        ours[..components] == theirs[..components]
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// Parsed constraint of a depends entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequirement {
    clauses: Vec<Clause>,
}

impl VersionRequirement {
    /// Parse a constraint such as `>=1.2,<2` or `~=3.1`
    pub fn parse(constraint: &str) -> Result<Self> {
        let clauses = constraint
            .split(',')
            .map(Clause::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    /// Check `version`, padding it the same way constraints are padded
    pub fn matches(&self, version: &str) -> Result<bool> {
        let (version, _) = parse_version(version)
            .map_err(|message| AddonError::InvalidDependency(format!("{}: {}", version, message)))?;
        Ok(self.matches_version(&version))
    }

    pub fn matches_version(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    /// Exact version pinned by a lone `==` clause, if any
    pub fn pinned(&self) -> Option<&Version> {
        match self.clauses.as_slice() {
            [clause] if clause.op == Operator::Eq && !clause.wildcard => Some(&clause.version),
            _ => None,
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        f.write_str(&clauses.join(","))
    }
}

fn invalid(raw: &str, message: &str) -> AddonError {
    AddonError::InvalidDependency(format!("{}: {}", raw, message))
}

/// Parse a version that may omit trailing components
fn parse_version(raw: &str) -> std::result::Result<(Version, usize), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing version".to_string());
    }

    if raw.contains(['-', '+']) {
        let version = Version::parse(raw).map_err(|e| e.to_string())?;
        return Ok((version, 3));
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() > 3 {
        return Err("more than three version components".to_string());
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("{:?} is not a version component", part))?;
    }

    Ok((Version::new(numbers[0], numbers[1], numbers[2]), parts.len()))
}
