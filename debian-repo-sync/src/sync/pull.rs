// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pulling packages between distributions of a repository. */

use {
    super::{RuleStream, StreamInput, SyncSource},
    crate::{
        candidate::{Candidate, Provenance},
        config::{
            component_selected, rule_components, source_architectures, DistributionConfig,
            RepositoryConfig,
        },
        error::{DebianError, Result},
        policy::{DecisionPolicy, FilterListPolicy},
        store::{filesystem::FilesystemTargetStore, TargetStore},
        target::TargetIdentifier,
    },
    async_trait::async_trait,
    std::collections::HashMap,
};

/// A [SyncSource] offering the committed packages of other distributions.
pub struct PullSource<'a> {
    config: &'a RepositoryConfig,
    policies: HashMap<String, FilterListPolicy>,
}

impl<'a> PullSource<'a> {
    /// Construct an instance for all pull rules of a repository.
    ///
    /// Filter list files are read here.
    pub fn new(config: &'a RepositoryConfig) -> Result<Self> {
        let policies = config
            .pull_rules
            .iter()
            .map(|rule| Ok((rule.name.clone(), FilterListPolicy::new(rule.filter()?))))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { config, policies })
    }

    /// The targets of the source distribution of `rule` feeding `target`.
    pub fn source_targets(&self, rule: &str, target: &TargetIdentifier) -> Result<Vec<TargetIdentifier>> {
        let rule = self.config.pull_rule(rule)?;
        let from = self.config.distribution(&rule.from)?;

        let components = rule_components(&rule.components, &rule.udeb_components, target.package_type);
        if !component_selected(components, &target.component) {
            return Ok(vec![]);
        }

        Ok(
            source_architectures(rule.architectures.as_deref(), &target.architecture)
                .into_iter()
                .map(|arch| {
                    TargetIdentifier::new(&from.codename, &target.component, arch, target.package_type)
                })
                .filter(|source| from.has_target(source))
                .collect(),
        )
    }
}

#[async_trait]
impl<'a> SyncSource for PullSource<'a> {
    fn rules<'d>(&self, dist: &'d DistributionConfig) -> &'d [String] {
        &dist.pulls
    }

    fn policy(&self, rule: &str) -> Result<&dyn DecisionPolicy> {
        self.policies
            .get(rule)
            .map(|policy| policy as &dyn DecisionPolicy)
            .ok_or_else(|| DebianError::UnknownRule(rule.to_string()))
    }

    async fn streams(&self, rule: &str, target: &TargetIdentifier) -> Result<Vec<RuleStream>> {
        let mut streams = vec![];

        for source in self.source_targets(rule, target)? {
            let provenance = Provenance::new(rule, &source);
            let package_type = source.package_type;

            let input = match FilesystemTargetStore::open(&self.config.db_dir, source, None).await {
                Ok(store) => {
                    let candidates = store
                        .packages()
                        .map(|record| {
                            record.and_then(|record| {
                                Candidate::from_paragraph(package_type, record.control)
                            })
                        })
                        .collect();

                    StreamInput::Candidates(candidates)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => StreamInput::Unavailable(e),
            };

            streams.push(RuleStream { provenance, input });
        }

        Ok(streams)
    }
}
