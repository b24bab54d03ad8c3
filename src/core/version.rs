//! Package versions
//!
//! Versions have the form `[epoch:]pkgver-pkgrel`. Ordering follows the
//! distribution's `vercmp`: epoch first, then `pkgver` and `pkgrel` compared
//! segment by segment, where numeric segments compare as numbers and alpha
//! segments compare lexically and sort before numbers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PackageError;

/// Full package version
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    /// Epoch, 0 when absent
    pub epoch: u32,
    /// Upstream version
    pub pkgver: String,
    /// Packaging release
    pub pkgrel: String,
}

impl PackageVersion {
    /// Create a version from its components
    pub fn new(epoch: u32, pkgver: impl Into<String>, pkgrel: impl Into<String>) -> Self {
        Self {
            epoch,
            pkgver: pkgver.into(),
            pkgrel: pkgrel.into(),
        }
    }

    /// Parse `[epoch:]pkgver-pkgrel`
    pub fn parse(version: &str) -> Result<Self, PackageError> {
        let invalid = |reason: &str| PackageError::InvalidVersion {
            version: version.to_string(),
            reason: reason.to_string(),
        };

        let (epoch, rest) = match version.split_once(':') {
            Some((epoch, rest)) => {
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| invalid("epoch must be a non-negative integer"))?;
                (epoch, rest)
            }
            None => (0, version),
        };

        let (pkgver, pkgrel) = rest
            .rsplit_once('-')
            .ok_or_else(|| invalid("missing '-pkgrel' suffix"))?;

        if pkgver.is_empty() {
            return Err(invalid("empty pkgver"));
        }
        if pkgrel.is_empty() {
            return Err(invalid("empty pkgrel"));
        }
        if pkgver.contains(':') || pkgver.chars().any(char::is_whitespace) {
            return Err(invalid("pkgver contains forbidden characters"));
        }

        Ok(Self::new(epoch, pkgver, pkgrel))
    }

    /// Check if this version is newer than `other`
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self > other
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| vercmp(&self.pkgver, &other.pkgver))
            .then_with(|| vercmp(&self.pkgrel, &other.pkgrel))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.pkgver, self.pkgrel)
    }
}

impl FromStr for PackageVersion {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = PackageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageVersion> for String {
    fn from(value: PackageVersion) -> Self {
        value.to_string()
    }
}

/// Compare two version fragments segment by segment
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < one.len() && j < two.len() {
        let (sep_start_one, sep_start_two) = (i, j);
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }

        if i >= one.len() || j >= two.len() {
            break;
        }

        // a longer separator run wins
        let (sep_one, sep_two) = (i - sep_start_one, j - sep_start_two);
        if sep_one != sep_two {
            return sep_one.cmp(&sep_two);
        }

        let is_num = one[i].is_ascii_digit();
        let in_segment = |c: u8| {
            if is_num {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        };
        let segment_end = |s: &[u8], mut k: usize| {
            while k < s.len() && in_segment(s[k]) {
                k += 1;
            }
            k
        };
        let end_one = segment_end(one, i);
        let end_two = segment_end(two, j);

        // segments of different kinds: numbers are newer
        if end_two == j {
            return if is_num {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg_one = &one[i..end_one];
        let mut seg_two = &two[j..end_two];

        if is_num {
            while seg_one.len() > 1 && seg_one[0] == b'0' {
                seg_one = &seg_one[1..];
            }
            while seg_two.len() > 1 && seg_two[0] == b'0' {
                seg_two = &seg_two[1..];
            }
            match seg_one.len().cmp(&seg_two.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        match seg_one.cmp(seg_two) {
            Ordering::Equal => {}
            other => return other,
        }

        i = end_one;
        j = end_two;
    }

    let rest_one = &one[i..];
    let rest_two = &two[j..];
    if rest_one.is_empty() && rest_two.is_empty() {
        return Ordering::Equal;
    }

    // a remaining alpha string never beats an empty one
    let one_alpha = rest_one.first().is_some_and(u8::is_ascii_alphabetic);
    let two_alpha = rest_two.first().is_some_and(u8::is_ascii_alphabetic);
    if (rest_one.is_empty() && !two_alpha) || one_alpha {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
