//! Protocol version parsing and drift tolerance
//!
//! Versions look like `MAJOR.MINOR.PATCH` with an optional `-bBETA` suffix.
//! Two versions are compatible when major and minor match exactly and the
//! patch numbers are at most one apart. The beta suffix never affects
//! compatibility.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::{DecodeError, DecodeResult};

/// Characters of the raw payload echoed into an incompatibility error.
pub const EXCERPT_LENGTH: usize = 250;

/// Maximum tolerated patch drift in either direction.
pub const PATCH_TOLERANCE: u64 = 1;

/// A parsed protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub beta: Option<u64>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            beta: None,
        }
    }

    pub fn parse(input: &str) -> DecodeResult<Self> {
        let invalid = || DecodeError::InvalidVersion(input.to_string());

        let (core, beta) = match input.split_once('-') {
            Some((core, suffix)) => {
                let digits = suffix.strip_prefix('b').ok_or_else(invalid)?;
                (core, Some(digits.parse::<u64>().map_err(|_| invalid())?))
            }
            None => (input, None),
        };

        let mut parts = core.split('.');
        let mut next = || -> DecodeResult<u64> {
            parts
                .next()
                .and_then(|part| part.parse::<u64>().ok())
                .ok_or_else(invalid)
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
            beta,
        })
    }

    /// Whether a payload at `other` may be decoded by a decoder at `self`.
    pub fn is_compatible(&self, other: &Version) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch.abs_diff(other.patch) <= PATCH_TOLERANCE
    }
}

impl FromStr for Version {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(beta) = self.beta {
            write!(f, "-b{}", beta)?;
        }
        Ok(())
    }
}

/// Check a payload's declared version against the decoder's own.
///
/// `raw` is the payload text; its first [`EXCERPT_LENGTH`] characters are
/// embedded in the error when the versions are incompatible.
pub fn check_version(actual: &str, expected: &str, raw: &str) -> DecodeResult<()> {
    let actual_version = Version::parse(actual)?;
    let expected_version = Version::parse(expected)?;

    if expected_version.is_compatible(&actual_version) {
        return Ok(());
    }

    warn!(actual, expected, "Rejecting payload with incompatible version");
    Err(DecodeError::IncompatibleVersion {
        actual: actual.to_string(),
        expected: expected.to_string(),
        excerpt: raw.chars().take(EXCERPT_LENGTH).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_beta() {
        assert_eq!(Version::parse("1.4.5").unwrap(), Version::new(1, 4, 5));

        let beta = Version::parse("0.7.12-b3").unwrap();
        assert_eq!(beta.patch, 12);
        assert_eq!(beta.beta, Some(3));
        assert_eq!(beta.to_string(), "0.7.12-b3");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "1", "1.2", "1.2.x", "1.2.3.4", "1.2.3-rc1", "1.2.3-b"] {
            assert!(
                matches!(Version::parse(input), Err(DecodeError::InvalidVersion(_))),
                "{input} should not parse"
            );
        }
    }

    #[test]
    fn test_compatibility_window() {
        let decoder = Version::new(2, 3, 10);
        assert!(decoder.is_compatible(&Version::new(2, 3, 9)));
        assert!(decoder.is_compatible(&Version::new(2, 3, 10)));
        assert!(decoder.is_compatible(&Version::new(2, 3, 11)));
        assert!(!decoder.is_compatible(&Version::new(2, 3, 12)));
        assert!(!decoder.is_compatible(&Version::new(2, 4, 10)));
        assert!(!decoder.is_compatible(&Version::new(3, 3, 10)));
    }

    #[test]
    fn test_patch_zero_lower_drift() {
        let decoder = Version::new(1, 0, 0);
        assert!(decoder.is_compatible(&Version::new(1, 0, 1)));
        assert!(!decoder.is_compatible(&Version::new(1, 0, 2)));
    }

    #[test]
    fn test_check_version_excerpt_is_truncated() {
        let raw = "x".repeat(400);
        let err = check_version("1.0.5", "1.0.0", &raw).unwrap_err();
        match err {
            DecodeError::IncompatibleVersion { excerpt, .. } => assert_eq!(excerpt.len(), 250),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let raw = "•".repeat(300);
        let err = check_version("9.0.0", "1.0.0", &raw).unwrap_err();
        match err {
            DecodeError::IncompatibleVersion { excerpt, .. } => {
                assert_eq!(excerpt.chars().count(), 250)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
