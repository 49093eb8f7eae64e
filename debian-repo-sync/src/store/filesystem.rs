// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based target stores.

Each target is persisted as a control file at
`<db_dir>/<codename>/<component>/<architecture>/<type>.packages` holding one
paragraph per package. Paragraphs are stored as they would appear in a
`Packages` or `Sources` index of the repository, so committed packages can be
read back as candidates by other distributions.
*/

use {
    crate::{
        candidate::{Candidate, PoolFile},
        control::{write_paragraphs, ControlParagraph, ControlParagraphAsyncReader},
        error::{DebianError, Result},
        store::{
            override_file::OverrideFile, pool_directory, InstallData, PackageRecord, TargetStore,
        },
        target::TargetIdentifier,
    },
    async_trait::async_trait,
    log::debug,
    std::{
        borrow::Cow,
        collections::BTreeMap,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// A [TargetStore] persisted as a control file.
#[derive(Debug)]
pub struct FilesystemTargetStore {
    identifier: TargetIdentifier,
    path: PathBuf,
    packages: BTreeMap<String, ControlParagraph<'static>>,
    session: Option<BTreeMap<String, ControlParagraph<'static>>>,
    overrides: Option<Arc<OverrideFile>>,
}

impl FilesystemTargetStore {
    /// Path of the file persisting a target.
    pub fn path_for(db_dir: &Path, identifier: &TargetIdentifier) -> PathBuf {
        db_dir
            .join(&identifier.codename)
            .join(&identifier.component)
            .join(&identifier.architecture)
            .join(format!("{}.packages", identifier.package_type))
    }

    /// Open the store of a target.
    ///
    /// A missing file is an empty target.
    pub async fn open(
        db_dir: &Path,
        identifier: TargetIdentifier,
        overrides: Option<Arc<OverrideFile>>,
    ) -> Result<Self> {
        let path = Self::path_for(db_dir, &identifier);

        let mut packages = BTreeMap::new();

        match async_std::fs::File::open(&path).await {
            Ok(fh) => {
                let mut reader = ControlParagraphAsyncReader::new(futures::io::BufReader::new(fh));

                while let Some(paragraph) = reader.read_paragraph().await? {
                    let name = paragraph.required_field_str("Package")?.to_string();

                    if packages.insert(name.clone(), paragraph).is_some() {
                        return Err(DebianError::InternalConsistency(format!(
                            "{} lists package {} more than once",
                            path.display(),
                            name
                        )));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DebianError::IoPath(path.display().to_string(), e)),
        }

        debug!("opened {} with {} packages", identifier, packages.len());

        Ok(Self {
            identifier,
            path,
            packages,
            session: None,
            overrides,
        })
    }

    /// The number of committed packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether no packages are committed.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn record(&self, control: &ControlParagraph<'static>) -> Result<PackageRecord> {
        let candidate = Candidate::from_paragraph(self.identifier.package_type, control.clone())?;

        Ok(PackageRecord {
            files: candidate
                .files
                .into_iter()
                .map(|f| PoolFile {
                    key: f.path.clone(),
                    origin: f.path,
                    size: f.size,
                    digest: f.digest,
                })
                .collect(),
            name: candidate.name,
            version: candidate.version,
            architecture: candidate.architecture,
            control: candidate.control,
        })
    }

    fn session_mut(&mut self) -> Result<&mut BTreeMap<String, ControlParagraph<'static>>> {
        let identifier = &self.identifier;

        self.session
            .as_mut()
            .ok_or_else(|| DebianError::StoreNoSession(identifier.to_string()))
    }
}

#[async_trait]
impl TargetStore for FilesystemTargetStore {
    fn identifier(&self) -> &TargetIdentifier {
        &self.identifier
    }

    fn packages(&self) -> Box<dyn Iterator<Item = Result<PackageRecord>> + Send + '_> {
        Box::new(self.packages.values().map(|control| self.record(control)))
    }

    async fn install_data(&self, candidate: &Candidate) -> Result<InstallData> {
        let directory = pool_directory(&self.identifier.component, &candidate.source_name);

        let files = candidate
            .files
            .iter()
            .map(|f| PoolFile {
                key: format!("{}/{}", directory, f.basename()),
                origin: f.path.clone(),
                size: f.size,
                digest: f.digest.clone(),
            })
            .collect::<Vec<_>>();

        let mut control = candidate.control.clone();

        if self.identifier.package_type.is_source() {
            control.set_field_from_string("Directory".into(), Cow::Owned(directory));
        } else {
            let file = files.first().ok_or_else(|| {
                DebianError::InternalConsistency(format!(
                    "binary package {} references no file",
                    candidate.name
                ))
            })?;

            control.set_field_from_string("Filename".into(), Cow::Owned(file.key.clone()));
        }

        Ok(InstallData { control, files })
    }

    fn apply_override(
        &self,
        name: &str,
        control: &ControlParagraph<'static>,
    ) -> Option<ControlParagraph<'static>> {
        self.overrides
            .as_ref()
            .and_then(|overrides| overrides.apply(name, control))
    }

    async fn begin_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(DebianError::StoreSessionActive(self.identifier.to_string()));
        }

        self.session = Some(self.packages.clone());

        Ok(())
    }

    async fn add_package(
        &mut self,
        name: &str,
        _version: &str,
        control: ControlParagraph<'static>,
        _files: &[PoolFile],
    ) -> Result<()> {
        self.session_mut()?.insert(name.to_string(), control);

        Ok(())
    }

    async fn remove_package(&mut self, name: &str) -> Result<()> {
        let identifier = self.identifier.to_string();

        match self.session_mut()?.remove(name) {
            Some(_) => Ok(()),
            None => Err(DebianError::PackageNotInTarget(name.to_string(), identifier)),
        }
    }

    async fn finish_session(&mut self) -> Result<()> {
        let session = self
            .session
            .take()
            .ok_or_else(|| DebianError::StoreNoSession(self.identifier.to_string()))?;

        if session == self.packages {
            return Ok(());
        }

        let mut data = vec![];
        write_paragraphs(&mut data, session.values())?;

        if let Some(parent) = self.path.parent() {
            async_std::fs::create_dir_all(parent)
                .await
                .map_err(|e| DebianError::IoPath(parent.display().to_string(), e))?;
        }

        let temp_path = PathBuf::from(format!("{}.new", self.path.display()));
        async_std::fs::write(&temp_path, &data)
            .await
            .map_err(|e| DebianError::IoPath(temp_path.display().to_string(), e))?;
        async_std::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DebianError::IoPath(self.path.display().to_string(), e))?;

        debug!("wrote {} packages to {}", session.len(), self.path.display());
        self.packages = session;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::ControlParagraphReader, target::PackageType},
        indoc::indoc,
    };

    const UPSTREAM: &str = indoc! {"
        Package: zlib1g
        Source: zlib
        Version: 1:1.2.11.dfsg-2
        Architecture: amd64
        Filename: pool/main/z/zlib/zlib1g_1.2.11.dfsg-2_amd64.deb
        Size: 3
        SHA256: 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824

        Package: libxml2
        Version: 2.9.10
        Architecture: amd64
        Filename: mirror/libxml2_2.9.10_amd64.deb
        Size: 5
        SHA256: 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
    "};

    fn candidates() -> Result<Vec<Candidate>> {
        ControlParagraphReader::new(std::io::Cursor::new(UPSTREAM.as_bytes()))
            .map(|p| Candidate::from_binary_paragraph(p?))
            .collect()
    }

    #[tokio::test]
    async fn session_round_trip() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let id = TargetIdentifier::new("bullseye", "main", "amd64", PackageType::Deb);

        let mut store = FilesystemTargetStore::open(td.path(), id.clone(), None).await?;
        assert!(store.is_empty());

        store.begin_session().await?;
        assert!(matches!(
            store.begin_session().await,
            Err(DebianError::StoreSessionActive(_))
        ));

        for candidate in candidates()? {
            let data = store.install_data(&candidate).await?;
            store
                .add_package(&candidate.name, &candidate.version, data.control, &data.files)
                .await?;
        }
        store.finish_session().await?;

        assert!(FilesystemTargetStore::path_for(td.path(), &id).exists());

        let store = FilesystemTargetStore::open(td.path(), id, None).await?;
        let records = store.packages().collect::<Result<Vec<_>>>()?;

        assert_eq!(
            records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["libxml2", "zlib1g"]
        );
        assert_eq!(
            records[0].files[0].key,
            "pool/main/libx/libxml2/libxml2_2.9.10_amd64.deb"
        );
        assert_eq!(
            records[1].control.field_str("Filename"),
            Some("pool/main/z/zlib/zlib1g_1.2.11.dfsg-2_amd64.deb")
        );

        Ok(())
    }

    #[tokio::test]
    async fn remove_requires_presence() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let id = TargetIdentifier::new("bullseye", "main", "amd64", PackageType::Deb);
        let mut store = FilesystemTargetStore::open(td.path(), id, None).await?;

        assert!(matches!(
            store.remove_package("foo").await,
            Err(DebianError::StoreNoSession(_))
        ));

        store.begin_session().await?;
        assert!(matches!(
            store.remove_package("foo").await,
            Err(DebianError::PackageNotInTarget(_, _))
        ));
        store.finish_session().await?;

        Ok(())
    }

    #[tokio::test]
    async fn overrides_applied() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let id = TargetIdentifier::new("bullseye", "main", "amd64", PackageType::Deb);
        let overrides = OverrideFile::from_reader(std::io::Cursor::new("zlib1g Priority required\n"))?;
        let store = FilesystemTargetStore::open(td.path(), id, Some(Arc::new(overrides))).await?;

        let candidate = candidates()?.remove(0);
        let data = store.install_data(&candidate).await?;
        let control = store.apply_override("zlib1g", &data.control);

        assert_eq!(
            control.as_ref().and_then(|c| c.field_str("Priority")),
            Some("required")
        );
        assert!(store.apply_override("libxml2", &data.control).is_none());

        Ok(())
    }
}
