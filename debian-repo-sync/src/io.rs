// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{DebianError, Result},
    digest::Digest,
    std::{
        fmt::Formatter,
        io::{BufRead, BufReader, Read},
        path::{Path, PathBuf},
    },
};

/// Flavor of content checksum.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Emit variants in their preferred usage order.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }

    /// Name of the control field in `Packages` paragraphs holding this variant type.
    pub fn packages_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Name of the multi-line control field in `Sources` paragraphs holding this variant type.
    pub fn sources_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "Files",
            Self::Sha1 => "Checksums-Sha1",
            Self::Sha256 => "Checksums-Sha256",
        }
    }

    /// Compute the digest of a buffer.
    pub fn digest_data(&self, data: &[u8]) -> ContentDigest {
        match self {
            Self::Md5 => ContentDigest::Md5(md5::Md5::digest(data).to_vec()),
            Self::Sha1 => ContentDigest::Sha1(sha1::Sha1::digest(data).to_vec()),
            Self::Sha256 => ContentDigest::Sha256(sha2::Sha256::digest(data).to_vec()),
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let prefix = match self {
            Self::Md5(_) => "md5",
            Self::Sha1(_) => "sha1",
            Self::Sha256(_) => "sha256",
        };

        write!(f, "{}:{}", prefix, self.digest_hex())
    }
}

impl ContentDigest {
    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest.trim())
            .map_err(|e| DebianError::ContentDigestBadHex(digest.to_string(), e))?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }

    /// Compute the digest of `data` with this digest's flavor.
    pub fn digest_of(&self, data: &[u8]) -> ContentDigest {
        self.checksum_type().digest_data(data)
    }

    /// Whether `data` hashes to this digest.
    pub fn matches_data(&self, data: &[u8]) -> bool {
        &self.digest_of(data) == self
    }
}

/// Compression format of index files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// XZ compression (.xz extension).
    Xz,

    /// Gzip compression (.gz extension).
    Gzip,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
        }
    }

    /// The default retrieval preference order.
    pub fn default_preferred_order() -> impl Iterator<Item = Compression> {
        [Self::None, Self::Xz, Self::Gzip].into_iter()
    }
}

/// Open an index file, trying each supported compression variant of `path`.
///
/// Returns the path actually opened together with a decompressing reader.
pub fn open_index_decompressed(path: &Path) -> Result<(PathBuf, Box<dyn BufRead + Send>)> {
    let mut last_error = None;

    for compression in Compression::default_preferred_order() {
        let candidate = PathBuf::from(format!("{}{}", path.display(), compression.extension()));

        let fh = match std::fs::File::open(&candidate) {
            Ok(fh) => fh,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        let reader: Box<dyn Read + Send> = match compression {
            Compression::None => Box::new(fh),
            Compression::Gzip => Box::new(
                libflate::gzip::Decoder::new(fh)
                    .map_err(|e| DebianError::IndexUnreadable(candidate.display().to_string(), e))?,
            ),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(fh)),
        };

        return Ok((candidate, Box::new(BufReader::new(reader))));
    }

    Err(DebianError::IndexUnreadable(
        path.display().to_string(),
        last_error.unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound)),
    ))
}
