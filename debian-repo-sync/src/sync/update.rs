// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Updating distributions from mirrored upstream repositories.

An update rule names a directory holding a Debian repository layout, as left
behind by a mirroring tool, and a suite within it. Candidates are read from
the suite's `Packages` and `Sources` indices. Files referenced by the indices
are relative to the mirror directory.
*/

use {
    super::{RuleStream, StreamInput, SyncSource},
    crate::{
        candidate::{Candidate, Provenance},
        config::{
            component_selected, rule_components, source_architectures, DistributionConfig,
            RepositoryConfig, UpdateRuleConfig,
        },
        control::ControlParagraphReader,
        error::{DebianError, Result},
        io::open_index_decompressed,
        policy::{DecisionPolicy, FilterListPolicy},
        target::{PackageType, TargetIdentifier},
    },
    async_trait::async_trait,
    log::debug,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
    },
};

/// Path of an index within a mirror, without compression extension.
pub fn index_path(
    source_dir: &Path,
    suite: &str,
    component: &str,
    architecture: &str,
    package_type: PackageType,
) -> PathBuf {
    let dir = source_dir.join("dists").join(suite).join(component);

    match package_type {
        PackageType::Deb => dir
            .join(format!("binary-{}", architecture))
            .join("Packages"),
        PackageType::Udeb => dir
            .join("debian-installer")
            .join(format!("binary-{}", architecture))
            .join("Packages"),
        PackageType::Dsc => dir.join("source").join("Sources"),
    }
}

/// Read all paragraphs of an index as candidates.
fn read_index(path: &Path, package_type: PackageType) -> Result<Vec<Result<Candidate>>> {
    let (opened, reader) = open_index_decompressed(path)?;
    debug!("reading {}", opened.display());

    Ok(ControlParagraphReader::new(reader)
        .map(|paragraph| paragraph.and_then(|p| Candidate::from_paragraph(package_type, p)))
        .collect())
}

/// A [SyncSource] offering the packages of mirrored repositories.
pub struct UpdateSource<'a> {
    config: &'a RepositoryConfig,
    policies: HashMap<String, FilterListPolicy>,
}

impl<'a> UpdateSource<'a> {
    /// Construct an instance for all update rules of a repository.
    pub fn new(config: &'a RepositoryConfig) -> Result<Self> {
        let policies = config
            .update_rules
            .iter()
            .map(|rule| Ok((rule.name.clone(), FilterListPolicy::new(rule.filter()?))))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { config, policies })
    }

    fn indices(rule: &UpdateRuleConfig, target: &TargetIdentifier) -> Vec<(String, PathBuf)> {
        let components = rule_components(&rule.components, &rule.udeb_components, target.package_type);
        if !component_selected(components, &target.component) {
            return vec![];
        }

        source_architectures(rule.architectures.as_deref(), &target.architecture)
            .into_iter()
            .map(|arch| {
                (
                    format!("{}|{}|{}", rule.suite, target.component, arch),
                    index_path(
                        &rule.source_dir,
                        &rule.suite,
                        &target.component,
                        &arch,
                        target.package_type,
                    ),
                )
            })
            .collect()
    }
}

#[async_trait]
impl<'a> SyncSource for UpdateSource<'a> {
    fn rules<'d>(&self, dist: &'d DistributionConfig) -> &'d [String] {
        &dist.updates
    }

    fn policy(&self, rule: &str) -> Result<&dyn DecisionPolicy> {
        self.policies
            .get(rule)
            .map(|policy| policy as &dyn DecisionPolicy)
            .ok_or_else(|| DebianError::UnknownRule(rule.to_string()))
    }

    async fn streams(&self, rule: &str, target: &TargetIdentifier) -> Result<Vec<RuleStream>> {
        let rule_config = self.config.update_rule(rule)?;
        let package_type = target.package_type;

        let mut streams = vec![];

        for (source, path) in Self::indices(rule_config, target) {
            let input = match async_std::task::spawn_blocking(move || {
                read_index(&path, package_type)
            })
            .await
            {
                Ok(candidates) => StreamInput::Candidates(candidates),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => StreamInput::Unavailable(e),
            };

            streams.push(RuleStream {
                provenance: Provenance::new(rule, source),
                input,
            });
        }

        Ok(streams)
    }

    fn origins(&self) -> Vec<(String, PathBuf)> {
        self.config
            .update_rules
            .iter()
            .map(|rule| (rule.name.clone(), rule.source_dir.clone()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            interrupt::Interrupted,
            io::ChecksumType,
            store::{filesystem::FilesystemTargetStore, TargetStore},
            sync::{SyncOptions, SyncRunner},
        },
        indoc::{formatdoc, indoc},
        std::io::Write,
    };

    const CONFIG: &str = indoc! {r#"
        distributions:
          - codename: bookworm
            components: [main]
            architectures: [amd64]
            updates: [debian]
        update_rules:
          - name: debian
            source_dir: mirror
            suite: stable
            filter_list:
              packages:
                held: hold
    "#};

    /// Write a pool file into the mirror and return its index paragraph.
    fn mirror_package(mirror: &Path, name: &str, version: &str) -> Result<String> {
        let filename = format!("pool/main/{}/{}/{}_{}_amd64.deb", &name[0..1], name, name, version);
        let data = format!("{} {}", name, version);

        let path = mirror.join(&filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &data)?;

        Ok(formatdoc! {"
            Package: {name}
            Version: {version}
            Architecture: amd64
            Filename: {filename}
            Size: {size}
            SHA256: {digest}

            ",
            name = name,
            version = version,
            filename = filename,
            size = data.len(),
            digest = ChecksumType::Sha256.digest_data(data.as_bytes()).digest_hex(),
        })
    }

    #[test]
    fn index_paths() {
        let root = Path::new("/srv/mirror");

        assert_eq!(
            index_path(root, "stable", "main", "amd64", PackageType::Deb),
            root.join("dists/stable/main/binary-amd64/Packages")
        );
        assert_eq!(
            index_path(root, "stable", "main", "amd64", PackageType::Udeb),
            root.join("dists/stable/main/debian-installer/binary-amd64/Packages")
        );
        assert_eq!(
            index_path(root, "stable", "main", "source", PackageType::Dsc),
            root.join("dists/stable/main/source/Sources")
        );
    }

    #[tokio::test]
    async fn missing_index_is_unavailable() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mut config = RepositoryConfig::from_yaml(CONFIG)?;
        config.resolve_paths(td.path());

        let source = UpdateSource::new(&config)?;
        let streams = source
            .streams(
                "debian",
                &TargetIdentifier::new("bookworm", "main", "amd64", PackageType::Deb),
            )
            .await?;

        assert_eq!(streams.len(), 1);
        assert!(matches!(
            streams[0].input,
            StreamInput::Unavailable(DebianError::IndexUnreadable(_, _))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn update_from_mirror() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mut config = RepositoryConfig::from_yaml(CONFIG)?;
        config.resolve_paths(td.path());
        let mirror = td.path().join("mirror");

        let mut index = String::new();
        // Out of order on purpose.
        index.push_str(&mirror_package(&mirror, "zsh", "5.8")?);
        index.push_str(&mirror_package(&mirror, "hello", "2.10")?);
        index.push_str(&mirror_package(&mirror, "held", "9.0")?);

        let index_dir = mirror.join("dists/stable/main/binary-amd64");
        std::fs::create_dir_all(&index_dir)?;
        let mut encoder = libflate::gzip::Encoder::new(std::fs::File::create(
            index_dir.join("Packages.gz"),
        )?)?;
        encoder.write_all(index.as_bytes())?;
        encoder.finish().into_result()?;

        let source = UpdateSource::new(&config)?;
        let runner = SyncRunner::new(&config, SyncOptions::default(), Interrupted::new());
        let summary = runner.run(&source, &["bookworm".to_string()]).await?;

        assert!(summary.is_success());
        assert_eq!(summary.added, 2);

        let store = FilesystemTargetStore::open(
            &config.db_dir,
            TargetIdentifier::new("bookworm", "main", "amd64", PackageType::Deb),
            None,
        )
        .await?;
        let names = store
            .packages()
            .map(|r| r.map(|r| (r.name, r.version)))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(
            names,
            vec![
                ("hello".to_string(), "2.10".to_string()),
                ("zsh".to_string(), "5.8".to_string()),
            ]
        );

        assert!(config
            .base_dir
            .join("pool/main/h/hello/hello_2.10_amd64.deb")
            .exists());

        Ok(())
    }
}
