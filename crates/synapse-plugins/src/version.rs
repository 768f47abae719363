//! Dependency version constraints.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// A dependency requirement: an exact version or a minimum version.
///
/// Parsed from `"1.2.0"` or `"=1.2.0"` (exact) and `">=1.2.0"` (minimum).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    /// Only this version.
    Exact(Version),
    /// This version or any later one.
    AtLeast(Version),
}

impl VersionConstraint {
    /// Whether `version` satisfies the constraint.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(required) => version == required,
            Self::AtLeast(minimum) => version >= minimum,
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (exact, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
            (false, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (true, rest)
        } else {
            (true, trimmed)
        };
        let version = Version::parse(rest.trim()).map_err(|e| PluginError::InvalidConstraint {
            constraint: s.to_string(),
            message: e.to_string(),
        })?;
        Ok(if exact {
            Self::Exact(version)
        } else {
            Self::AtLeast(version)
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::AtLeast(v) => write!(f, ">={v}"),
        }
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
