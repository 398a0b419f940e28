//! Integration version parsing (`major.minor.patch[-pre][+build]`).

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid integration version {0:?}: expected major.minor.patch")]
pub struct VersionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl IntegrationVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self { Self { major, minor, patch, pre: None } }

    /// Same owner generation: minor and patch drift is tolerated.
    pub fn same_major(&self, other: &Self) -> bool { self.major == other.major }
}

fn parse_numeric(part: &str, raw: &str) -> Result<u64, VersionError> {
    // leading zeros are not valid semver
    if part.is_empty() || (part.len() > 1 && part.starts_with('0')) || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError(raw.to_string()));
    }
    part.parse::<u64>().map_err(|_| VersionError(raw.to_string()))
}

impl FromStr for IntegrationVersion {
    type Err = VersionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let without_build = raw.split_once('+').map(|(v, _)| v).unwrap_or(raw);
        let (core, pre) = match without_build.split_once('-') {
            Some((c, p)) if !p.is_empty() => (c, Some(p.to_string())),
            Some(_) => return Err(VersionError(raw.to_string())),
            None => (without_build, None),
        };
        let parts: Vec<&str> = core.split('.').collect();
        match parts.as_slice() {
            [major, minor, patch] => Ok(Self {
                major: parse_numeric(major, raw)?,
                minor: parse_numeric(minor, raw)?,
                patch: parse_numeric(patch, raw)?,
                pre,
            }),
            _ => Err(VersionError(raw.to_string())),
        }
    }
}

impl fmt::Display for IntegrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_prerelease() {
        let v: IntegrationVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, IntegrationVersion::new(1, 2, 3));
        let v: IntegrationVersion = "0.1.0-rc.1+abc".parse().unwrap();
        assert_eq!(v.pre.as_deref(), Some("rc.1"));
        assert_eq!(v.to_string(), "0.1.0-rc.1");
    }

    #[test]
    fn rejects_partial_versions() {
        assert!("1.2".parse::<IntegrationVersion>().is_err());
        assert!("".parse::<IntegrationVersion>().is_err());
        assert!("01.2.3".parse::<IntegrationVersion>().is_err());
        assert!("1.2.x".parse::<IntegrationVersion>().is_err());
    }
}
