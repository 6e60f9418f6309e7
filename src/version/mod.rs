// src/version/mod.rs

//! Component versions and dependency requirements
//!
//! Versions are compared semantically: when both sides are valid semver the
//! semver ordering is used, otherwise the versions are split into dotted
//! segments and compared numerically segment by segment ("1.10" > "1.9").
//!
//! Dependency requirements have the form `name[comparator]version`, where the
//! comparator is one of `=`, `<`, `<=`, `>`, `>=`. A `:` may separate the name
//! from the version part (`org.app:>=1.5`), which is required when the name
//! itself contains comparator characters.

use crate::error::{Error, Result};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

static COMPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([<=>]+)?\s*(.*?)\s*$").unwrap());

/// A component version string with semantic ordering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentVersion(String);

impl ComponentVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare two versions semantically
    pub fn compare(&self, other: &ComponentVersion) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ComponentVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for ComponentVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for ComponentVersion {}

impl Ord for ComponentVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for ComponentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings
///
/// Missing trailing segments count as zero, so "1.0" equals "1.0.0".
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if let (Ok(va), Ok(vb)) = (Version::parse(a), Version::parse(b)) {
        return va.cmp(&vb);
    }

    let left: Vec<&str> = a.split(['.', '-', '_']).collect();
    let right: Vec<&str> = b.split(['.', '-', '_']).collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(ln), Ok(rn)) => ln.cmp(&rn),
            // A numeric segment sorts after an alphanumeric one ("1.0" > "1.0-beta")
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Version comparison operator in a requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparator {
    #[default]
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparator {
    /// Parse a comparator token such as `>=`
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "" | "=" | "==" => Ok(Self::Equal),
            "<" => Ok(Self::Less),
            "<=" | "=<" => Ok(Self::LessOrEqual),
            ">" => Ok(Self::Greater),
            ">=" | "=>" => Ok(Self::GreaterOrEqual),
            other => Err(Error::ParseError(format!(
                "Invalid version comparator '{}'",
                other
            ))),
        }
    }

    fn allows(self, ord: Ordering) -> bool {
        match self {
            Self::Equal => ord == Ordering::Equal,
            Self::Less => ord == Ordering::Less,
            Self::LessOrEqual => ord != Ordering::Greater,
            Self::Greater => ord == Ordering::Greater,
            Self::GreaterOrEqual => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

/// A comparator plus the version it compares against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequirement {
    pub comparator: Comparator,
    pub version: ComponentVersion,
}

impl VersionRequirement {
    /// Parse a requirement such as ">=1.5" or "2.0" (no comparator means `=`)
    pub fn parse(s: &str) -> Result<Self> {
        let caps = COMPARATOR_RE
            .captures(s)
            .ok_or_else(|| Error::ParseError(format!("Invalid version requirement '{}'", s)))?;
        let comparator = Comparator::parse(caps.get(1).map_or("", |m| m.as_str()))?;
        let version = caps.get(2).map_or("", |m| m.as_str());
        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Version requirement '{}' has no version",
                s
            )));
        }
        Ok(Self {
            comparator,
            version: ComponentVersion::new(version),
        })
    }

    /// Check whether `version` satisfies this requirement
    pub fn matches(&self, version: &ComponentVersion) -> bool {
        self.comparator.allows(version.compare(&self.version))
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.comparator, self.version)
    }
}

/// A parsed `name[comparator]version` dependency reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequirement {
    pub name: String,
    pub version: Option<VersionRequirement>,
}

impl DependencyRequirement {
    /// Parse a dependency string
    ///
    /// Accepted forms:
    /// - "org.app" → any version
    /// - "org.app>=1.5" / "org.app=2.0"
    /// - "org.app:>=1.5" / "org.app:2.0" (explicit separator)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("Empty dependency requirement".to_string()));
        }

        let (name, version_part) = if let Some(pos) = s.find(':') {
            (&s[..pos], &s[pos + 1..])
        } else if let Some(pos) = s.find(['<', '=', '>']) {
            (&s[..pos], &s[pos..])
        } else {
            (s, "")
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ParseError(format!(
                "Dependency requirement '{}' has no component name",
                s
            )));
        }

        let version = if version_part.trim().is_empty() {
            None
        } else {
            Some(VersionRequirement::parse(version_part)?)
        };

        Ok(Self {
            name: name.to_string(),
            version,
        })
    }

    /// Check whether a component called `name` at `version` satisfies this requirement
    pub fn matches(&self, name: &str, version: &ComponentVersion) -> bool {
        self.name == name && self.version.as_ref().is_none_or(|req| req.matches(version))
    }
}

impl fmt::Display for DependencyRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(req) => write!(f, "{}:{}", self.name, req),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Check a version string against a requirement string like ">=1.5"
///
/// An unparsable requirement never matches.
pub fn matches(version: &str, requirement: &str) -> bool {
    VersionRequirement::parse(requirement)
        .map(|req| req.matches(&ComponentVersion::new(version)))
        .unwrap_or(false)
}
