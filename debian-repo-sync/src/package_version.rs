// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling.

The merge engine only needs a total order over version strings. That order is
abstracted behind [VersionComparator] so callers can substitute their own. The
default, [DebianVersionComparator], parses both sides into [PackageVersion] and
compares them following the rules `dpkg` uses.
*/

use {
    crate::error::{DebianError, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("version string is empty")]
    Empty,

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

/// A Debian package version.
///
/// The format is `[epoch:]upstream_version[-debian_revision]`. See
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> std::result::Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, remainder)) => (Some(epoch), remainder),
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (remainder, None),
        };

        let epoch = match epoch {
            Some(epoch) if epoch.is_empty() || !epoch.bytes().all(|c| c.is_ascii_digit()) => {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }
            Some(epoch) => Some(u32::from_str(epoch)?),
            None => None,
        };

        // Colons are only legal in the upstream part when an epoch is present and hyphens only
        // when a revision is present.
        let upstream_ok = !upstream.is_empty()
            && upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' => true,
                '-' => revision.is_some(),
                ':' => epoch.is_some(),
                _ => false,
            });
        if !upstream_ok {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        if let Some(revision) = revision {
            if revision.is_empty()
                || !revision
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '~'))
            {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }
        }

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision: revision.map(|r| r.to_string()),
        })
    }

    /// The `epoch` component, defaulting to `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        f.write_str(&self.upstream_version)?;
        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Sort weight of a character in the non-digit part of a version component.
///
/// Tilde sorts before everything, even the end of the part. Letters sort before
/// non-letters.
fn char_weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare two runs of digits numerically without overflowing.
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare a version component string using Debian rules.
///
/// Alternates between comparing a run of non-digits with [char_weight] and a
/// run of digits numerically until both inputs are exhausted.
fn compare_component(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit())
        {
            let ac = a.get(i).copied().filter(|c| !c.is_ascii_digit());
            let bc = b.get(j).copied().filter(|c| !c.is_ascii_digit());

            match char_weight(ac).cmp(&char_weight(bc)) {
                Ordering::Equal => {}
                res => return res,
            }

            if ac.is_some() {
                i += 1;
            }
            if bc.is_some() {
                j += 1;
            }
        }

        let a_start = i;
        while i < a.len() && a[i].is_ascii_digit() {
            i += 1;
        }
        let b_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }

        // Slices only hold ASCII digits.
        let a_digits = std::str::from_utf8(&a[a_start..i]).unwrap_or("");
        let b_digits = std::str::from_utf8(&b[b_start..j]).unwrap_or("");

        match compare_digits(a_digits, b_digits) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    Ordering::Equal
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // The absence of a debian revision is equivalent to `0`.
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

/// A total order over version strings.
pub trait VersionComparator: Send + Sync {
    /// Compare version `a` against version `b`.
    ///
    /// `package` is only used for error reporting.
    fn compare(&self, package: &str, a: &str, b: &str) -> Result<Ordering>;
}

/// Compares versions using Debian version semantics.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebianVersionComparator;

impl VersionComparator for DebianVersionComparator {
    fn compare(&self, package: &str, a: &str, b: &str) -> Result<Ordering> {
        if a == b {
            return Ok(Ordering::Equal);
        }

        let a = PackageVersion::parse(a)
            .map_err(|e| DebianError::VersionCompare(package.to_string(), e))?;
        let b = PackageVersion::parse(b)
            .map_err(|e| DebianError::VersionCompare(package.to_string(), e))?;

        Ok(a.cmp(&b))
    }
}
