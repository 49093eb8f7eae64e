// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository configuration.

A repository is described by a YAML document listing its distributions and the
rules distributions are synchronized by. For example:

```yaml
base_dir: .
distributions:
  - codename: bullseye
    components: [main]
    architectures: [amd64, source]
    updates: ["-", debian]
  - codename: bullseye-testing
    components: [main]
    architectures: [amd64, source]
    pulls: [from-stable]
update_rules:
  - name: debian
    source_dir: /srv/mirror/debian
    suite: bullseye
pull_rules:
  - name: from-stable
    from: bullseye
    filter_list:
      default: deinstall
      packages:
        hello: install
```

Relative paths are relative to the directory holding the configuration file.
*/

use {
    crate::{
        error::{DebianError, Result},
        policy::{FilterAction, FilterList},
        target::{PackageType, TargetIdentifier, SOURCE_ARCHITECTURE},
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashSet},
        path::{Path, PathBuf},
    },
};

/// Rule name that marks everything for deletion.
pub const DELETE_MARKER: &str = "-";

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_filter_action() -> FilterAction {
    FilterAction::Install
}

/// Configuration of a repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Root of the repository, holding `pool/`.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory holding the package stores of targets.
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// Directory holding distribution change logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    pub distributions: Vec<DistributionConfig>,

    #[serde(default)]
    pub pull_rules: Vec<PullRuleConfig>,

    #[serde(default)]
    pub update_rules: Vec<UpdateRuleConfig>,
}

/// Configuration of a distribution.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    pub codename: String,

    pub components: Vec<String>,

    /// Components also holding installer packages.
    #[serde(default)]
    pub udeb_components: Vec<String>,

    /// Architectures, `source` standing for source packages.
    pub architectures: Vec<String>,

    /// Pull rules applied in order.
    #[serde(default)]
    pub pulls: Vec<String>,

    /// Update rules applied in order.
    #[serde(default)]
    pub updates: Vec<String>,

    /// File of per-package field overrides.
    #[serde(default, rename = "override")]
    pub override_file: Option<PathBuf>,

    /// Name of the change log file within the log directory.
    pub log: Option<String>,
}

impl DistributionConfig {
    /// All targets of this distribution.
    pub fn targets(&self) -> Vec<TargetIdentifier> {
        let mut targets = vec![];

        for component in &self.components {
            for arch in &self.architectures {
                let package_type = if arch == SOURCE_ARCHITECTURE {
                    PackageType::Dsc
                } else {
                    PackageType::Deb
                };

                targets.push(TargetIdentifier::new(
                    &self.codename,
                    component,
                    arch,
                    package_type,
                ));
            }
        }

        for component in &self.udeb_components {
            for arch in self
                .architectures
                .iter()
                .filter(|a| a.as_str() != SOURCE_ARCHITECTURE)
            {
                targets.push(TargetIdentifier::new(
                    &self.codename,
                    component,
                    arch,
                    PackageType::Udeb,
                ));
            }
        }

        targets
    }

    /// Whether the distribution has a target for the given identifier, ignoring the codename.
    pub fn has_target(&self, target: &TargetIdentifier) -> bool {
        let components = if target.package_type == PackageType::Udeb {
            &self.udeb_components
        } else {
            &self.components
        };

        components.contains(&target.component) && self.architectures.contains(&target.architecture)
    }
}

/// Filter list definition.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterListConfig {
    /// Action for packages not listed.
    #[serde(default = "default_filter_action")]
    pub default: FilterAction,

    /// Actions by package name.
    #[serde(default)]
    pub packages: BTreeMap<String, FilterAction>,

    /// File of `package action` lines.
    pub file: Option<PathBuf>,
}

impl FilterListConfig {
    /// Resolve into a [FilterList], reading the entry file if configured.
    ///
    /// Inline entries take precedence over entries of the file.
    pub fn build(&self) -> Result<FilterList> {
        let mut filter = FilterList::new(self.default);

        if let Some(path) = &self.file {
            filter.read_path(path)?;
        }

        for (package, action) in &self.packages {
            filter.set(package, *action);
        }

        Ok(filter)
    }
}

/// Build the filter list of a rule, installing everything when none is configured.
fn build_filter(filter: &Option<FilterListConfig>) -> Result<FilterList> {
    match filter {
        Some(filter) => filter.build(),
        None => Ok(FilterList::default()),
    }
}

/// Map an architecture of a destination to the architectures of a source.
///
/// `mapping` entries are either plain architectures or `from>into` pairs.
/// Without a mapping, every architecture maps to itself.
pub fn source_architectures(mapping: Option<&[String]>, into: &str) -> Vec<String> {
    match mapping {
        None => vec![into.to_string()],
        Some(mapping) => mapping
            .iter()
            .filter_map(|entry| match entry.split_once('>') {
                Some((from, to)) if to.trim() == into => Some(from.trim().to_string()),
                None if entry.trim() == into => Some(into.to_string()),
                _ => None,
            })
            .collect(),
    }
}

/// Whether a component passes an optional component restriction.
pub fn component_selected(restriction: Option<&[String]>, component: &str) -> bool {
    restriction
        .map(|components| components.iter().any(|c| c == component))
        .unwrap_or(true)
}

/// A rule pulling packages from another distribution of the repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PullRuleConfig {
    pub name: String,

    /// Codename of the distribution to pull from.
    pub from: String,

    pub components: Option<Vec<String>>,

    pub udeb_components: Option<Vec<String>>,

    pub architectures: Option<Vec<String>>,

    pub filter_list: Option<FilterListConfig>,
}

impl PullRuleConfig {
    pub fn filter(&self) -> Result<FilterList> {
        build_filter(&self.filter_list)
    }
}

/// A rule updating from a local mirror of an upstream repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRuleConfig {
    pub name: String,

    /// Root of the upstream repository, holding `dists/` and `pool/`.
    pub source_dir: PathBuf,

    /// Distribution of the upstream repository to read.
    pub suite: String,

    pub components: Option<Vec<String>>,

    pub udeb_components: Option<Vec<String>>,

    pub architectures: Option<Vec<String>>,

    pub filter_list: Option<FilterListConfig>,
}

impl UpdateRuleConfig {
    pub fn filter(&self) -> Result<FilterList> {
        build_filter(&self.filter_list)
    }
}

/// The component restriction of a rule for a package type.
pub fn rule_components<'a>(
    components: &'a Option<Vec<String>>,
    udeb_components: &'a Option<Vec<String>>,
    package_type: PackageType,
) -> Option<&'a [String]> {
    if package_type == PackageType::Udeb {
        udeb_components.as_deref()
    } else {
        components.as_deref()
    }
}

fn resolve(root: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = root.join(path.as_path());
    }
}

impl RepositoryConfig {
    /// Parse a configuration from YAML.
    ///
    /// Relative paths are kept relative.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)?;
        config.validate()?;

        Ok(config)
    }

    /// Load a configuration file, resolving relative paths against its directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DebianError::IoPath(path.display().to_string(), e))?;

        let mut config = Self::from_yaml(&data)?;

        let root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&root);

        Ok(config)
    }

    /// Make relative paths relative to `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        resolve(root, &mut self.base_dir);
        resolve(root, &mut self.db_dir);
        resolve(root, &mut self.log_dir);

        for dist in self.distributions.iter_mut() {
            if let Some(path) = dist.override_file.as_mut() {
                resolve(root, path);
            }
        }

        for rule in self.pull_rules.iter_mut() {
            if let Some(path) = rule.filter_list.as_mut().and_then(|f| f.file.as_mut()) {
                resolve(root, path);
            }
        }

        for rule in self.update_rules.iter_mut() {
            resolve(root, &mut rule.source_dir);
            if let Some(path) = rule.filter_list.as_mut().and_then(|f| f.file.as_mut()) {
                resolve(root, path);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let mut codenames = HashSet::new();
        for dist in &self.distributions {
            if !codenames.insert(dist.codename.as_str()) {
                return Err(DebianError::Config(format!(
                    "distribution {} defined more than once",
                    dist.codename
                )));
            }

            for name in dist.pulls.iter().filter(|n| n.as_str() != DELETE_MARKER) {
                self.pull_rule(name)?;
            }
            for name in dist.updates.iter().filter(|n| n.as_str() != DELETE_MARKER) {
                self.update_rule(name)?;
            }

            if let Some(component) = dist
                .udeb_components
                .iter()
                .find(|c| !dist.components.contains(c))
            {
                return Err(DebianError::Config(format!(
                    "{}: udeb component {} is not a component",
                    dist.codename, component
                )));
            }
        }

        for rule in &self.pull_rules {
            if !codenames.contains(rule.from.as_str()) {
                return Err(DebianError::UnknownDistribution(rule.from.clone()));
            }
        }

        Ok(())
    }

    pub fn distribution(&self, codename: &str) -> Result<&DistributionConfig> {
        self.distributions
            .iter()
            .find(|d| d.codename == codename)
            .ok_or_else(|| DebianError::UnknownDistribution(codename.to_string()))
    }

    pub fn pull_rule(&self, name: &str) -> Result<&PullRuleConfig> {
        self.pull_rules
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DebianError::UnknownRule(name.to_string()))
    }

    pub fn update_rule(&self, name: &str) -> Result<&UpdateRuleConfig> {
        self.update_rules
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DebianError::UnknownRule(name.to_string()))
    }

    /// Path of the change log of a distribution, if it has one.
    pub fn log_path(&self, dist: &DistributionConfig) -> Option<PathBuf> {
        dist.log.as_ref().map(|name| self.log_dir.join(name))
    }
}
