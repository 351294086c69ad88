//! Version identifiers of the form `v<integer>`.
//!
//! Identifiers are lower-cased before parsing, so `V21` and `v21` are the
//! same version. Anything else is still a usable identifier but has no
//! ordinal; it ranks below every well-formed version.

use std::cmp::Ordering;
use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version identifier '{0}': expected v<non-negative integer>")]
    InvalidVersion(String),
}

/// Ordering key of a version. Malformed identifiers all share the lowest rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Malformed,
    Ordinal(u64),
}

/// Normalized form used for names, labels and map keys.
pub fn normalize(identifier: &str) -> String {
    identifier.trim().to_ascii_lowercase()
}

pub fn parse(identifier: &str) -> Result<u64, VersionError> {
    let norm = normalize(identifier);
    let digits = norm
        .strip_prefix('v')
        .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| VersionError::InvalidVersion(identifier.to_string()))?;
    digits
        .parse::<u64>()
        .map_err(|_| VersionError::InvalidVersion(identifier.to_string()))
}

pub fn rank(identifier: &str) -> Rank {
    match parse(identifier) {
        Ok(n) => Rank::Ordinal(n),
        Err(_) => Rank::Malformed,
    }
}

pub fn compare(a: &str, b: &str) -> Ordering {
    rank(a).cmp(&rank(b))
}

/// A normalized version identifier together with its rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    id: String,
    rank: Rank,
}

impl Version {
    pub fn new(identifier: &str) -> Self {
        let id = normalize(identifier);
        let rank = rank(&id);
        Self { id, rank }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn is_malformed(&self) -> bool {
        self.rank == Rank::Malformed
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_identifiers() {
        assert_eq!(parse("v0"), Ok(0));
        assert_eq!(parse("v21"), Ok(21));
        assert_eq!(parse("V22"), Ok(22));
        assert_eq!(parse("v007"), Ok(7));
    }

    #[test]
    fn rejects_other_forms() {
        for bad in ["", "v", "21", "v-1", "v1.2", "latest", "vv3", "v 3", "v18446744073709551616"] {
            assert_eq!(
                parse(bad),
                Err(VersionError::InvalidVersion(bad.to_string())),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        assert_eq!(compare("v9", "v10"), Ordering::Less);
        assert_eq!(compare("v100", "v21"), Ordering::Greater);
        assert_eq!(compare("v21", "V21"), Ordering::Equal);
    }

    #[test]
    fn malformed_versions_are_equal_and_lowest() {
        assert_eq!(compare("latest", "canary"), Ordering::Equal);
        assert_eq!(compare("latest", "v0"), Ordering::Less);
        assert_eq!(compare("v0", "garbage"), Ordering::Greater);
    }

    #[test]
    fn version_normalizes_identifier() {
        let v = Version::new(" V23 ");
        assert_eq!(v.as_str(), "v23");
        assert_eq!(v.rank(), Rank::Ordinal(23));
        assert!(Version::new("beta").is_malformed());
    }
}
