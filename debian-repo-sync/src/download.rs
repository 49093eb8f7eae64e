// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Acquisition of package files into the pool.

A [DownloadAgent] makes sure the files a pending package references are
present in the destination pool with the expected content. [DownloadQueue]
batches requests of a whole run so failures are known before anything is
committed.
*/

use {
    crate::{
        candidate::{PoolFile, Provenance},
        error::{DebianError, Result},
    },
    async_trait::async_trait,
    futures::StreamExt,
    log::{debug, warn},
    std::{
        collections::{BTreeMap, HashMap},
        path::{Component, Path, PathBuf},
        sync::Arc,
    },
};

/// Ensures package files are available in the pool.
#[async_trait]
pub trait DownloadAgent: Sync {
    /// Make every file of `files` present and verified.
    ///
    /// Files already present with matching content are no-ops.
    async fn ensure(&self, files: &[PoolFile], provenance: &Provenance) -> Result<()>;
}

/// A path that stays below the directory it is joined to.
///
/// Index supplied paths that are absolute or climb out with `..` are
/// treated as unavailable.
fn contained_path(path: &str) -> Result<&Path> {
    let p = Path::new(path);

    if p.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(p)
    } else {
        Err(DebianError::MissingFile(path.to_string()))
    }
}

/// Verify data against the expectations of a pool file.
fn verify(file: &PoolFile, data: &[u8]) -> Result<()> {
    if data.len() as u64 != file.size {
        return Err(DebianError::SizeMismatch {
            key: file.key.clone(),
            expected: file.size,
            actual: data.len() as u64,
        });
    }

    let actual = file.digest.digest_of(data);
    if actual != file.digest {
        return Err(DebianError::ChecksumMismatch {
            key: file.key.clone(),
            expected: file.digest.digest_hex(),
            actual: actual.digest_hex(),
        });
    }

    Ok(())
}

/// A [DownloadAgent] copying files from local repository trees into a pool.
///
/// The tree a file is copied from is looked up by the rule of the
/// [Provenance] requesting it, defaulting to the destination repository itself.
#[derive(Clone, Debug)]
pub struct PoolDownloadAgent {
    base_dir: PathBuf,
    origins: HashMap<String, PathBuf>,
}

impl PoolDownloadAgent {
    /// Construct an instance writing into the repository at `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            origins: HashMap::new(),
        }
    }

    /// Register the root directory files requested by a rule are relative to.
    pub fn add_origin(&mut self, rule: impl ToString, root: impl AsRef<Path>) {
        self.origins
            .insert(rule.to_string(), root.as_ref().to_path_buf());
    }

    async fn ensure_file(&self, file: &PoolFile, provenance: &Provenance) -> Result<()> {
        let dest = self.base_dir.join(contained_path(&file.key)?);

        match async_std::fs::read(&dest).await {
            Ok(data) => return verify(file, &data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DebianError::IoPath(dest.display().to_string(), e)),
        }

        let root = self
            .origins
            .get(&provenance.rule)
            .unwrap_or(&self.base_dir);
        let source = root.join(contained_path(&file.origin)?);

        let data = match async_std::fs::read(&source).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DebianError::MissingFile(source.display().to_string()));
            }
            Err(e) => return Err(DebianError::IoPath(source.display().to_string(), e)),
        };

        verify(file, &data)?;

        if let Some(parent) = dest.parent() {
            async_std::fs::create_dir_all(parent)
                .await
                .map_err(|e| DebianError::IoPath(parent.display().to_string(), e))?;
        }

        let temp = PathBuf::from(format!("{}.new", dest.display()));
        async_std::fs::write(&temp, &data)
            .await
            .map_err(|e| DebianError::IoPath(temp.display().to_string(), e))?;
        async_std::fs::rename(&temp, &dest)
            .await
            .map_err(|e| DebianError::IoPath(dest.display().to_string(), e))?;

        debug!("copied {} to {}", source.display(), file.key);

        Ok(())
    }
}

#[async_trait]
impl DownloadAgent for PoolDownloadAgent {
    async fn ensure(&self, files: &[PoolFile], provenance: &Provenance) -> Result<()> {
        for file in files {
            self.ensure_file(file, provenance).await?;
        }

        Ok(())
    }
}

/// Collects file requests of a run and performs them in one batch.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    requests: BTreeMap<String, (PoolFile, Arc<Provenance>)>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the files of a pending package.
    ///
    /// A key already queued is not queued again.
    pub fn request(&mut self, files: &[PoolFile], provenance: &Arc<Provenance>) {
        for file in files {
            self.requests
                .entry(file.key.clone())
                .or_insert_with(|| (file.clone(), provenance.clone()));
        }
    }

    /// The number of distinct files queued.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Perform all queued requests with at most `max_parallel` in flight.
    ///
    /// Returns the errors of failed requests keyed by file key.
    pub async fn run(
        self,
        agent: &dyn DownloadAgent,
        max_parallel: usize,
    ) -> BTreeMap<String, DebianError> {
        let fs = self.requests.into_values().map(|(file, provenance)| async move {
            let res = agent
                .ensure(std::slice::from_ref(&file), provenance.as_ref())
                .await;
            (file.key, res)
        });

        let mut buffered = futures::stream::iter(fs).buffer_unordered(max_parallel.max(1));

        let mut failures = BTreeMap::new();
        while let Some((key, res)) = buffered.next().await {
            if let Err(e) = res {
                warn!("unable to acquire {}: {}", key, e);
                failures.insert(key, e);
            }
        }

        failures
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::io::ChecksumType};

    fn pool_file(key: &str, origin: &str, data: &[u8]) -> PoolFile {
        PoolFile {
            key: key.to_string(),
            origin: origin.to_string(),
            size: data.len() as u64,
            digest: ChecksumType::Sha256.digest_data(data),
        }
    }

    #[tokio::test]
    async fn copies_and_verifies() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mirror = td.path().join("mirror");
        let repo = td.path().join("repo");
        std::fs::create_dir_all(mirror.join("pool"))?;
        std::fs::write(mirror.join("pool/foo.deb"), b"foo")?;

        let mut agent = PoolDownloadAgent::new(&repo);
        agent.add_origin("upstream", &mirror);
        let provenance = Provenance::new("upstream", "bullseye|main|amd64");

        let file = pool_file("pool/main/f/foo/foo.deb", "pool/foo.deb", b"foo");
        agent.ensure(&[file.clone()], &provenance).await?;
        assert_eq!(std::fs::read(repo.join(&file.key))?, b"foo");

        // Present and matching.
        agent.ensure(&[file], &provenance).await?;

        let missing = pool_file("pool/main/b/bar/bar.deb", "pool/bar.deb", b"bar");
        assert!(matches!(
            agent.ensure(&[missing], &provenance).await,
            Err(DebianError::MissingFile(_))
        ));

        let mut wrong = pool_file("pool/main/f/foo/foo2.deb", "pool/foo.deb", b"fox");
        assert!(matches!(
            agent.ensure(&[wrong.clone()], &provenance).await,
            Err(DebianError::ChecksumMismatch { .. })
        ));
        wrong.size = 10;
        assert!(matches!(
            agent.ensure(&[wrong], &provenance).await,
            Err(DebianError::SizeMismatch { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn paths_stay_below_roots() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mirror = td.path().join("mirror");
        std::fs::create_dir_all(&mirror)?;
        std::fs::write(td.path().join("secret"), b"foo")?;

        let mut agent = PoolDownloadAgent::new(td.path().join("repo"));
        agent.add_origin("upstream", &mirror);
        let provenance = Provenance::new("upstream", "bullseye|main|amd64");

        let secret = td.path().join("secret").display().to_string();
        for (key, origin) in [
            ("pool/main/f/foo/foo.deb", "../secret"),
            ("pool/main/f/foo/foo.deb", secret.as_str()),
            ("../escaped.deb", "secret"),
        ] {
            assert!(matches!(
                agent.ensure(&[pool_file(key, origin, b"foo")], &provenance).await,
                Err(DebianError::MissingFile(_))
            ));
        }
        assert!(!td.path().join("repo/pool/main/f/foo/foo.deb").exists());
        assert!(!td.path().join("escaped.deb").exists());

        Ok(())
    }

    #[tokio::test]
    async fn queue_deduplicates() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        std::fs::create_dir_all(td.path().join("in"))?;
        std::fs::write(td.path().join("in/a"), b"a")?;

        let agent = PoolDownloadAgent::new(td.path());
        let provenance = Arc::new(Provenance::new("rule", "local"));

        let a = pool_file("out/a", "in/a", b"a");
        let b = pool_file("out/b", "in/b", b"b");
        let mut queue = DownloadQueue::new();
        queue.request(&[a.clone(), b.clone()], &provenance);
        queue.request(&[a], &provenance);
        assert_eq!(queue.len(), 2);

        let failures = queue.run(&agent, 4).await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures.get("out/b"), Some(DebianError::MissingFile(_))));
        assert!(td.path().join("out/a").exists());

        Ok(())
    }
}
