use super::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Platform version, totally ordered.
///
/// Accepts the short forms `7` and `7.1` in addition to full `major.minor.patch`,
/// padding the missing components with zero.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let dots = trimmed.split('-').next().unwrap_or_default().matches('.').count();
        let padded = match dots {
            0 => format!("{trimmed}.0.0"),
            1 => format!("{trimmed}.0"),
            _ => trimmed.to_string(),
        };
        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|err| ControllerError::invalid(format!("Invalid version '{s}': {err}")))
    }
}

impl TryFrom<String> for Version {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRevision {
    pub repository: String,
    pub branch: String,
    pub commit: String,
}

impl SourceRevision {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
        }
    }
}

/// Version of an application package: the build that produced it and its source.
///
/// Ordered by build number first; an unknown version sorts before every known one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ApplicationVersion {
    pub source: Option<SourceRevision>,
    pub build_number: Option<u64>,
}

impl ApplicationVersion {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn from(source: SourceRevision, build_number: u64) -> Self {
        Self {
            source: Some(source),
            build_number: Some(build_number),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.build_number.is_none() && self.source.is_none()
    }

    /// String form used as the artifact key.
    pub fn id(&self) -> String {
        match (&self.build_number, &self.source) {
            (Some(build), Some(source)) => {
                format!("1.0.{}-{}", build, abbreviate_commit(&source.commit))
            }
            (Some(build), None) => format!("1.0.{build}"),
            _ => "unknown".to_string(),
        }
    }
}

fn abbreviate_commit(commit: &str) -> &str {
    commit.get(..9).unwrap_or(commit)
}

impl PartialOrd for ApplicationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApplicationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.build_number
            .cmp(&other.build_number)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl fmt::Display for ApplicationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
