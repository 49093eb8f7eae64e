// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package stores backing targets.

A [TargetStore] holds the committed packages of exactly one target. The merge
engine reads the baseline from it, asks it to render install data for
candidates, and writes its decisions back through a read-write session.
*/

use {
    crate::{
        candidate::{Candidate, PoolFile},
        control::ControlParagraph,
        error::Result,
        target::TargetIdentifier,
    },
    async_trait::async_trait,
};

pub mod filesystem;
pub mod override_file;

/// A package committed to a target.
#[derive(Clone, Debug)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub control: ControlParagraph<'static>,
    /// Files referenced by the package. `origin` equals `key` for committed packages.
    pub files: Vec<PoolFile>,
}

/// What is needed to commit a candidate into a target.
#[derive(Clone, Debug)]
pub struct InstallData {
    /// Control paragraph as it will be written to the target.
    pub control: ControlParagraph<'static>,
    /// Files the control paragraph references, with their destination keys.
    pub files: Vec<PoolFile>,
}

/// Interface to the packages of one target.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// The target this store holds.
    fn identifier(&self) -> &TargetIdentifier;

    /// Iterate committed packages.
    ///
    /// Packages must be emitted in strictly ascending name order.
    fn packages(&self) -> Box<dyn Iterator<Item = Result<PackageRecord>> + Send + '_>;

    /// Render the control data and destination file keys for committing a candidate.
    async fn install_data(&self, candidate: &Candidate) -> Result<InstallData>;

    /// Apply per-package overrides to control data about to be committed.
    ///
    /// Returns `None` when the control data is left unchanged.
    fn apply_override(
        &self,
        name: &str,
        control: &ControlParagraph<'static>,
    ) -> Option<ControlParagraph<'static>>;

    /// Open a read-write session.
    async fn begin_session(&mut self) -> Result<()>;

    /// Add or replace a package within the open session.
    async fn add_package(
        &mut self,
        name: &str,
        version: &str,
        control: ControlParagraph<'static>,
        files: &[PoolFile],
    ) -> Result<()>;

    /// Remove a package within the open session.
    async fn remove_package(&mut self, name: &str) -> Result<()>;

    /// Close the open session, persisting its changes.
    async fn finish_session(&mut self) -> Result<()>;
}

/// The directory in the pool holding files of a source package.
///
/// `lib*` sources are spread by their first 4 characters, everything else by
/// the first character.
pub fn pool_directory(component: &str, source: &str) -> String {
    let len = if source.starts_with("lib") && source.chars().count() > 3 {
        4
    } else {
        1
    };
    let prefix = source.chars().take(len).collect::<String>();

    format!("pool/{}/{}/{}", component, prefix, source)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_directories() {
        assert_eq!(pool_directory("main", "zlib"), "pool/main/z/zlib");
        assert_eq!(pool_directory("main", "libxml2"), "pool/main/libx/libxml2");
        assert_eq!(pool_directory("contrib", "lib"), "pool/contrib/l/lib");
        assert_eq!(pool_directory("main", "libé"), "pool/main/libé/libé");
        assert_eq!(pool_directory("main", "éclair"), "pool/main/é/éclair");
    }
}
