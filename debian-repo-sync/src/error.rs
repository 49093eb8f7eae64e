// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("YAML error: {0:?}")]
    ConfigYaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("required field missing in control paragraph: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("control field {0} has malformed value: {1}")]
    ControlFieldMalformed(&'static str, String),

    #[error("bad hex in content digest {0}: {1:?}")]
    ContentDigestBadHex(String, hex::FromHexError),

    #[error("could not determine content digest of {0}")]
    PackageNoDigest(String),

    #[error("error comparing versions of {0}: {1}")]
    VersionCompare(String, VersionError),

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("decision policy rejected {package} for {target} with an error verdict")]
    PolicyError { target: String, package: String },

    #[error("file {0} is not available")]
    MissingFile(String),

    #[error("checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {key}: expected {expected}, got {actual}")]
    SizeMismatch { key: String, expected: u64, actual: u64 },

    #[error("package {0} is not present in {1}")]
    PackageNotInTarget(String, String),

    #[error("no read-write session open on {0}")]
    StoreNoSession(String),

    #[error("read-write session already open on {0}")]
    StoreSessionActive(String),

    #[error("unknown distribution: {0}")]
    UnknownDistribution(String),

    #[error("unknown rule: {0}")]
    UnknownRule(String),

    #[error("unknown filter list action: {0}")]
    UnknownFilterAction(String),

    #[error("index {0} could not be read: {1:?}")]
    IndexUnreadable(String, std::io::Error),

    #[error("{0} files could not be acquired")]
    DownloadFailures(usize),

    #[error("interrupted")]
    Cancelled,
}

impl DebianError {
    /// Whether this error must stop the entire run.
    ///
    /// Other errors only abandon the target or stream they occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency(_) | Self::Cancelled)
    }

    /// Whether this error only concerns a single package and can be skipped over.
    pub fn is_per_package(&self) -> bool {
        matches!(
            self,
            Self::MissingFile(_) | Self::ChecksumMismatch { .. } | Self::SizeMismatch { .. }
        )
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;
