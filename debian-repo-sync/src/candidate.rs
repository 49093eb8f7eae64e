// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Packages offered for merging into a target.

A [Candidate] is built from one paragraph of a `Packages` or `Sources` index
(or from a package already stored in another target). It only lives for the
duration of one merge step.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
        target::PackageType,
    },
    std::str::FromStr,
};

/// A file referenced by a candidate, relative to the root of the repository it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CandidateFile {
    /// Path relative to the source repository root.
    pub path: String,
    /// Expected size in bytes.
    pub size: u64,
    /// Expected content digest.
    pub digest: ContentDigest,
}

impl CandidateFile {
    /// The final path component.
    pub fn basename(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.path,
        }
    }
}

/// A file as it will be referenced by a target once a package is committed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolFile {
    /// Path of the file relative to the destination repository root.
    pub key: String,
    /// Path of the file relative to the root of the repository it is acquired from.
    pub origin: String,
    /// Expected size in bytes.
    pub size: u64,
    /// Expected content digest.
    pub digest: ContentDigest,
}

/// Identifies where a pending package came from.
///
/// Only used for change logging and diagnostics, and to find the repository a
/// [PoolFile::origin] is relative to.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Provenance {
    /// Name of the rule whose stream produced the package.
    pub rule: String,
    /// Label of the source the stream read from.
    pub source: String,
}

impl Provenance {
    pub fn new(rule: impl ToString, source: impl ToString) -> Self {
        Self {
            rule: rule.to_string(),
            source: source.to_string(),
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rule, self.source)
    }
}

/// A package offered to a target.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub name: String,
    pub version: String,
    pub source_name: String,
    pub source_version: String,
    pub architecture: String,
    pub control: ControlParagraph<'static>,
    pub files: Vec<CandidateFile>,
}

/// Split a `Source` field of the form `name (version)`.
fn parse_source_field(value: &str) -> Result<(&str, Option<&str>)> {
    let value = value.trim();

    match value.split_once('(') {
        Some((name, rest)) => {
            let version = rest
                .trim()
                .strip_suffix(')')
                .ok_or_else(|| DebianError::ControlFieldMalformed("Source", value.to_string()))?;

            Ok((name.trim(), Some(version.trim())))
        }
        None => Ok((value, None)),
    }
}

impl Candidate {
    /// Construct an instance from an index paragraph of the given package type.
    pub fn from_paragraph(
        package_type: PackageType,
        paragraph: ControlParagraph<'static>,
    ) -> Result<Self> {
        if package_type.is_source() {
            Self::from_source_paragraph(paragraph)
        } else {
            Self::from_binary_paragraph(paragraph)
        }
    }

    /// Construct an instance from a `Packages` paragraph.
    ///
    /// The single referenced file comes from the `Filename` and `Size` fields and the
    /// strongest digest advertised.
    pub fn from_binary_paragraph(paragraph: ControlParagraph<'static>) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.to_string();
        let version = paragraph.required_field_str("Version")?.to_string();
        let architecture = paragraph.required_field_str("Architecture")?.to_string();

        let (source_name, source_version) = match paragraph.field_str("Source") {
            Some(v) => {
                let (n, v) = parse_source_field(v)?;
                (n.to_string(), v.unwrap_or(&version).to_string())
            }
            None => (name.clone(), version.clone()),
        };

        let path = paragraph.required_field_str("Filename")?.to_string();
        let size = paragraph
            .field_u64("Size")
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing("Size".to_string()))??;

        let digest = ChecksumType::preferred_order()
            .find_map(|checksum| {
                paragraph
                    .field_str(checksum.packages_field_name())
                    .map(|hex| ContentDigest::from_hex_digest(checksum, hex))
            })
            .ok_or_else(|| DebianError::PackageNoDigest(name.clone()))??;

        Ok(Self {
            name,
            version,
            source_name,
            source_version,
            architecture,
            control: paragraph,
            files: vec![CandidateFile { path, size, digest }],
        })
    }

    /// Construct an instance from a `Sources` paragraph.
    ///
    /// Files are taken from the strongest checksum list present and are located
    /// relative to the `Directory` field.
    pub fn from_source_paragraph(paragraph: ControlParagraph<'static>) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.to_string();
        let version = paragraph.required_field_str("Version")?.to_string();
        let architecture = paragraph
            .field_str("Architecture")
            .unwrap_or("any")
            .to_string();
        let directory = paragraph
            .required_field_str("Directory")?
            .trim_end_matches('/')
            .to_string();

        let (checksum, lines) = ChecksumType::preferred_order()
            .find_map(|checksum| {
                paragraph
                    .field_iter_value_lines(checksum.sources_field_name())
                    .map(|lines| (checksum, lines.collect::<Vec<_>>()))
            })
            .ok_or_else(|| DebianError::PackageNoDigest(name.clone()))?;

        let files = lines
            .into_iter()
            .map(|line| {
                let mut parts = line.split_ascii_whitespace();

                match (parts.next(), parts.next(), parts.next()) {
                    (Some(digest), Some(size), Some(filename)) => Ok(CandidateFile {
                        path: if directory.is_empty() {
                            filename.to_string()
                        } else {
                            format!("{}/{}", directory, filename)
                        },
                        size: u64::from_str(size)?,
                        digest: ContentDigest::from_hex_digest(checksum, digest)?,
                    }),
                    _ => Err(DebianError::ControlFieldMalformed(
                        checksum.sources_field_name(),
                        line.to_string(),
                    )),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source_name: name.clone(),
            source_version: version.clone(),
            name,
            version,
            architecture,
            control: paragraph,
            files,
        })
    }

    /// Whether this candidate is an architecture independent package.
    pub fn is_architecture_all(&self) -> bool {
        self.architecture == crate::target::ALL_ARCHITECTURE
    }
}
