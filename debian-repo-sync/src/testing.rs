// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory collaborators recording how they are used. */

use {
    crate::{
        candidate::{Candidate, CandidateFile, PoolFile, Provenance},
        control::ControlParagraph,
        download::DownloadAgent,
        error::{DebianError, Result},
        interrupt::Interrupted,
        io::ChecksumType,
        logger::{ChangeLogger, ChangeRecord},
        store::{
            filesystem::FilesystemTargetStore, pool_directory, InstallData, PackageRecord,
            TargetStore,
        },
        target::{PackageType, TargetIdentifier},
    },
    async_trait::async_trait,
    std::{
        borrow::Cow,
        collections::HashSet,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    },
};

/// Build a candidate with a single `.deb` file.
pub fn candidate_with_arch(name: &str, version: &str, architecture: &str) -> Candidate {
    let mut control = ControlParagraph::default();
    control.set_field_from_string("Package".into(), Cow::Owned(name.to_string()));
    control.set_field_from_string("Version".into(), Cow::Owned(version.to_string()));
    control.set_field_from_string("Architecture".into(), Cow::Owned(architecture.to_string()));

    Candidate {
        name: name.to_string(),
        version: version.to_string(),
        source_name: name.to_string(),
        source_version: version.to_string(),
        architecture: architecture.to_string(),
        control,
        files: vec![CandidateFile {
            path: format!("incoming/{}_{}_{}.deb", name, version, architecture),
            size: 1,
            digest: ChecksumType::Sha256.digest_data(name.as_bytes()),
        }],
    }
}

pub fn candidate(name: &str, version: &str) -> Candidate {
    candidate_with_arch(name, version, "amd64")
}

/// Candidates for `(name, version)` pairs, in the given order.
pub fn stream_of(items: &[(&str, &str)]) -> Vec<Result<Candidate>> {
    items
        .iter()
        .map(|(name, version)| Ok(candidate(name, version)))
        .collect()
}

/// Commit binary packages to a target on disk, writing their pool files.
///
/// Pool files contain `name version` and are referenced by `Filename`, `Size`
/// and `SHA256` fields.
pub async fn write_target(
    base_dir: &Path,
    db_dir: &Path,
    target: TargetIdentifier,
    packages: &[(&str, &str)],
) -> Result<()> {
    let architecture = target.architecture.clone();
    let mut store = FilesystemTargetStore::open(db_dir, target, None).await?;
    store.begin_session().await?;

    for (name, version) in packages {
        let data = format!("{} {}", name, version);
        let key = format!(
            "{}/{}_{}_{}.deb",
            pool_directory(&store.identifier().component, name),
            name,
            version,
            architecture
        );
        let path = base_dir.join(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &data)?;

        let digest = ChecksumType::Sha256.digest_data(data.as_bytes());
        let mut control = ControlParagraph::default();
        for (field, value) in [
            ("Package", name.to_string()),
            ("Version", version.to_string()),
            ("Architecture", architecture.clone()),
            ("Filename", key.clone()),
            ("Size", data.len().to_string()),
            ("SHA256", digest.digest_hex()),
        ] {
            control.set_field_from_string(Cow::Borrowed(field), Cow::Owned(value));
        }

        let file = PoolFile {
            key: key.clone(),
            origin: key,
            size: data.len() as u64,
            digest,
        };
        store.add_package(name, version, control, &[file]).await?;
    }

    store.finish_session().await
}

/// A mutation made to a [MemoryTargetStore].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreCall {
    Add(String, String),
    Remove(String),
}

/// A [TargetStore] holding packages in memory.
///
/// Packages are iterated in the order they were given, sorted or not.
pub struct MemoryTargetStore {
    identifier: TargetIdentifier,
    packages: Vec<PackageRecord>,
    session: bool,
    calls: Vec<StoreCall>,
    install_data_calls: AtomicUsize,
}

impl MemoryTargetStore {
    pub fn for_target(identifier: TargetIdentifier) -> Self {
        Self {
            identifier,
            packages: vec![],
            session: false,
            calls: vec![],
            install_data_calls: AtomicUsize::new(0),
        }
    }

    pub fn new() -> Self {
        Self::for_target(TargetIdentifier::new("test", "main", "amd64", PackageType::Deb))
    }

    pub fn with_packages(packages: &[(&str, &str)]) -> Self {
        let mut store = Self::new();

        store.packages = packages
            .iter()
            .map(|(name, version)| {
                let c = candidate(name, version);
                PackageRecord {
                    name: c.name,
                    version: c.version,
                    architecture: c.architecture,
                    control: c.control,
                    files: vec![],
                }
            })
            .collect();

        store
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.clone()
    }

    pub fn install_data_calls(&self) -> usize {
        self.install_data_calls.load(Ordering::SeqCst)
    }

    pub fn session_closed(&self) -> bool {
        !self.session
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    fn identifier(&self) -> &TargetIdentifier {
        &self.identifier
    }

    fn packages(&self) -> Box<dyn Iterator<Item = Result<PackageRecord>> + Send + '_> {
        Box::new(self.packages.iter().cloned().map(Ok))
    }

    async fn install_data(&self, candidate: &Candidate) -> Result<InstallData> {
        self.install_data_calls.fetch_add(1, Ordering::SeqCst);

        let directory = pool_directory(&self.identifier.component, &candidate.source_name);

        Ok(InstallData {
            control: candidate.control.clone(),
            files: candidate
                .files
                .iter()
                .map(|f| PoolFile {
                    key: format!("{}/{}", directory, f.basename()),
                    origin: f.path.clone(),
                    size: f.size,
                    digest: f.digest.clone(),
                })
                .collect(),
        })
    }

    fn apply_override(
        &self,
        _name: &str,
        _control: &ControlParagraph<'static>,
    ) -> Option<ControlParagraph<'static>> {
        None
    }

    async fn begin_session(&mut self) -> Result<()> {
        if self.session {
            return Err(DebianError::StoreSessionActive(self.identifier.to_string()));
        }
        self.session = true;

        Ok(())
    }

    async fn add_package(
        &mut self,
        name: &str,
        version: &str,
        control: ControlParagraph<'static>,
        files: &[PoolFile],
    ) -> Result<()> {
        if !self.session {
            return Err(DebianError::StoreNoSession(self.identifier.to_string()));
        }

        self.calls
            .push(StoreCall::Add(name.to_string(), version.to_string()));

        let record = PackageRecord {
            name: name.to_string(),
            version: version.to_string(),
            architecture: control.field_str("Architecture").unwrap_or("").to_string(),
            control,
            files: files.to_vec(),
        };

        match self.packages.binary_search_by(|p| p.name.as_str().cmp(name)) {
            Ok(i) => self.packages[i] = record,
            Err(i) => self.packages.insert(i, record),
        }

        Ok(())
    }

    async fn remove_package(&mut self, name: &str) -> Result<()> {
        if !self.session {
            return Err(DebianError::StoreNoSession(self.identifier.to_string()));
        }

        self.calls.push(StoreCall::Remove(name.to_string()));
        self.packages.retain(|p| p.name != name);

        Ok(())
    }

    async fn finish_session(&mut self) -> Result<()> {
        if !self.session {
            return Err(DebianError::StoreNoSession(self.identifier.to_string()));
        }
        self.session = false;

        Ok(())
    }
}

/// A [DownloadAgent] recording requested keys and failing for configured ones.
#[derive(Default)]
pub struct RecordingAgent {
    missing: HashSet<String>,
    ensured: Mutex<Vec<String>>,
}

impl RecordingAgent {
    pub fn missing(keys: &[&str]) -> Self {
        Self {
            missing: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn ensured(&self) -> Vec<String> {
        self.ensured
            .lock()
            .map(|ensured| ensured.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DownloadAgent for RecordingAgent {
    async fn ensure(&self, files: &[PoolFile], _provenance: &Provenance) -> Result<()> {
        for file in files {
            if self.missing.contains(&file.key) {
                return Err(DebianError::MissingFile(file.key.clone()));
            }

            if let Ok(mut ensured) = self.ensured.lock() {
                ensured.push(file.key.clone());
            }
        }

        Ok(())
    }
}

/// A [ChangeLogger] keeping rendered lines.
///
/// Can interrupt a run after a number of records.
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<String>>,
    interrupt: Option<(usize, Interrupted)>,
}

impl RecordingLogger {
    pub fn interrupting_after(count: usize, interrupted: Interrupted) -> Self {
        Self {
            interrupt: Some((count, interrupted)),
            ..Default::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl ChangeLogger for RecordingLogger {
    fn record(&self, change: &ChangeRecord<'_>) -> Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| DebianError::InternalConsistency("lock poisoned".into()))?;
        lines.push(change.log_line());

        if let Some((count, interrupted)) = &self.interrupt {
            if lines.len() >= *count {
                interrupted.interrupt();
            }
        }

        Ok(())
    }
}
