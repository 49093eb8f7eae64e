// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synchronizing distributions.

A run has two phases. The search phase merges, for every target of the
selected distributions, the candidate streams of the configured rules into a
[MergeState]. The commit phase then acquires all needed files in one batch
before anything is written, and commits each target. Dry runs stop after the
search phase and report the planned changes instead.

Where candidates come from is abstracted by [SyncSource]. Implementations
exist for pulling from other distributions of the same repository
([pull::PullSource]) and for updating from local mirrors of upstream
repositories ([update::UpdateSource]).
*/

pub mod pull;
pub mod update;

use {
    crate::{
        candidate::{Candidate, Provenance},
        config::{DistributionConfig, RepositoryConfig, DELETE_MARKER},
        download::{DownloadQueue, PoolDownloadAgent},
        error::{DebianError, Result},
        interrupt::Interrupted,
        logger::{ChangeLogger, FileChangeLogger, LogChangeLogger, MultiChangeLogger},
        merge::{CandidateStream, DumpRecord, MergeState},
        package_version::{DebianVersionComparator, VersionComparator},
        policy::DecisionPolicy,
        store::{filesystem::FilesystemTargetStore, override_file::OverrideFile},
        target::TargetIdentifier,
    },
    async_trait::async_trait,
    futures::StreamExt,
    log::{debug, error, info, warn},
    std::{path::PathBuf, sync::Arc},
};

/// What a rule offers to a target.
pub enum StreamInput {
    /// Candidates to merge.
    Candidates(Vec<Result<Candidate>>),
    /// The source could not be read.
    ///
    /// Deletions are not committed for targets with unavailable sources.
    Unavailable(DebianError),
}

/// One candidate stream of a rule.
pub struct RuleStream {
    pub provenance: Provenance,
    pub input: StreamInput,
}

/// Provides the candidate streams distributions are synchronized from.
#[async_trait]
pub trait SyncSource: Sync {
    /// The rules applied to a distribution, in order.
    fn rules<'d>(&self, dist: &'d DistributionConfig) -> &'d [String];

    /// The policy deciding on candidates of a rule.
    fn policy(&self, rule: &str) -> Result<&dyn DecisionPolicy>;

    /// The candidate streams a rule offers to a target.
    async fn streams(&self, rule: &str, target: &TargetIdentifier) -> Result<Vec<RuleStream>>;

    /// Directories files requested by rules are relative to, keyed by rule name.
    fn origins(&self) -> Vec<(String, PathBuf)> {
        vec![]
    }
}

/// Behavior of a run.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Maximum number of targets searched and files acquired concurrently.
    pub max_parallel_io: usize,
    /// Commit targets even if they would lose many packages.
    pub ignore_big_deletes: bool,
    /// Commit even if some files could not be acquired.
    pub keep_going: bool,
    /// Remove replaced packages before installing their replacements.
    pub predelete: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_parallel_io: 4,
            ignore_big_deletes: false,
            keep_going: false,
            predelete: false,
        }
    }
}

/// The merged state of a target, ready to be committed.
pub struct TargetRun {
    store: FilesystemTargetStore,
    state: MergeState,
    ignore_deletions: bool,
    logger: Arc<dyn ChangeLogger>,
}

impl TargetRun {
    pub fn target(&self) -> &TargetIdentifier {
        self.state.target()
    }

    pub fn state(&self) -> &MergeState {
        &self.state
    }

    /// Whether deletions will not be committed.
    pub fn ignores_deletions(&self) -> bool {
        self.ignore_deletions
    }
}

/// Result of the search phase.
#[derive(Default)]
pub struct SearchResult {
    pub runs: Vec<TargetRun>,
    pub failed: Vec<(TargetIdentifier, DebianError)>,
}

impl SearchResult {
    /// Report the planned changes of every target.
    pub fn dump<F>(&self, mut emit: F)
    where
        F: FnMut(&TargetIdentifier, &DumpRecord<'_>),
    {
        for run in &self.runs {
            run.state.dump(|record| emit(run.target(), record));
        }
    }
}

/// Result of a run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Targets that were committed.
    pub committed: usize,
    /// Targets not committed because they would lose too many packages.
    pub abstained: Vec<TargetIdentifier>,
    /// Targets that failed to be searched or committed.
    pub failed: Vec<(TargetIdentifier, DebianError)>,
    /// Packages that could not be committed.
    pub package_failures: Vec<(TargetIdentifier, String, DebianError)>,
    pub added: usize,
    pub removed: usize,
}

impl SyncSummary {
    /// Whether everything that was attempted succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.package_failures.is_empty()
    }
}

/// Performs runs against a repository.
pub struct SyncRunner<'a> {
    config: &'a RepositoryConfig,
    options: SyncOptions,
    comparator: Arc<dyn VersionComparator>,
    interrupted: Interrupted,
}

impl<'a> SyncRunner<'a> {
    pub fn new(config: &'a RepositoryConfig, options: SyncOptions, interrupted: Interrupted) -> Self {
        Self {
            config,
            options,
            comparator: Arc::new(DebianVersionComparator),
            interrupted,
        }
    }

    /// Use a different version order.
    pub fn set_comparator(&mut self, comparator: Arc<dyn VersionComparator>) {
        self.comparator = comparator;
    }

    fn distribution_logger(&self, dist: &DistributionConfig) -> Arc<dyn ChangeLogger> {
        let mut logger = MultiChangeLogger::default();
        logger.push(Arc::new(LogChangeLogger));

        if let Some(path) = self.config.log_path(dist) {
            logger.push(Arc::new(FileChangeLogger::new(path)));
        }

        Arc::new(logger)
    }

    /// Merge the rules of the given distributions into their targets.
    ///
    /// Targets failing with non fatal errors are recorded in
    /// [SearchResult::failed]. Fatal errors abort the search.
    pub async fn search(
        &self,
        source: &dyn SyncSource,
        codenames: &[String],
    ) -> Result<SearchResult> {
        let mut work = vec![];

        for codename in codenames {
            let dist = self.config.distribution(codename)?;

            let overrides = match &dist.override_file {
                Some(path) => Some(Arc::new(OverrideFile::from_path(path)?)),
                None => None,
            };
            let logger = self.distribution_logger(dist);

            for target in dist.targets() {
                work.push((dist, target, overrides.clone(), logger.clone()));
            }
        }

        let fs = work
            .into_iter()
            .map(|(dist, target, overrides, logger)| async move {
                let res = self
                    .search_target(source, dist, target.clone(), overrides, logger)
                    .await;
                (target, res)
            });

        let mut buffered =
            futures::stream::iter(fs).buffer_unordered(self.options.max_parallel_io.max(1));

        let mut result = SearchResult::default();

        while let Some((target, res)) = buffered.next().await {
            match res {
                Ok(run) => result.runs.push(run),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("{}: {}", target, e);
                    result.failed.push((target, e));
                }
            }
        }

        result.runs.sort_by(|a, b| a.target().cmp(b.target()));

        Ok(result)
    }

    async fn search_target(
        &self,
        source: &dyn SyncSource,
        dist: &DistributionConfig,
        target: TargetIdentifier,
        overrides: Option<Arc<OverrideFile>>,
        logger: Arc<dyn ChangeLogger>,
    ) -> Result<TargetRun> {
        let store = FilesystemTargetStore::open(&self.config.db_dir, target.clone(), overrides).await?;
        let mut state = MergeState::init(&store, self.comparator.clone())?;
        let mut ignore_deletions = false;

        for rule in source.rules(dist) {
            self.interrupted.check()?;

            if rule == DELETE_MARKER {
                state.mark_all_for_deletion();
                ignore_deletions = false;
                continue;
            }

            let policy = source.policy(rule)?;

            for stream in source.streams(rule, &target).await? {
                match stream.input {
                    StreamInput::Unavailable(e) => {
                        warn!(
                            "{}: {} unavailable, not deleting anything: {}",
                            target, stream.provenance, e
                        );
                        ignore_deletions = true;
                    }
                    StreamInput::Candidates(candidates) => {
                        debug!("{}: merging {}", target, stream.provenance);

                        let stream_context = CandidateStream {
                            policy,
                            provenance: Arc::new(stream.provenance),
                        };
                        state
                            .process_stream(&store, &stream_context, candidates, &self.interrupted)
                            .await?;
                    }
                }
            }
        }

        Ok(TargetRun {
            store,
            state,
            ignore_deletions,
            logger,
        })
    }

    /// Commit the results of a search.
    ///
    /// Files of all targets are acquired before any target is committed. If
    /// any cannot be acquired nothing is installed, unless
    /// [SyncOptions::keep_going] is set. With [SyncOptions::predelete],
    /// replaced packages are removed before files are acquired.
    pub async fn commit(&self, source: &dyn SyncSource, search: SearchResult) -> Result<SyncSummary> {
        let mut summary = SyncSummary {
            failed: search.failed,
            ..Default::default()
        };

        let mut runs = vec![];
        for run in search.runs {
            if run.ignore_deletions && run.state.would_delete() {
                warn!(
                    "{}: keeping packages marked for deletion as a source was unavailable",
                    run.target()
                );
            }

            if !run.ignore_deletions && run.state.is_big_delete() {
                if self.options.ignore_big_deletes {
                    warn!("{}: committing big delete as requested", run.target());
                } else {
                    warn!(
                        "{}: not committing as too many packages would be deleted",
                        run.target()
                    );
                    summary.abstained.push(run.target().clone());
                    continue;
                }
            }

            runs.push(run);
        }

        let mut agent = PoolDownloadAgent::new(&self.config.base_dir);
        for (rule, root) in source.origins() {
            agent.add_origin(rule, root);
        }

        if self.config.distributions.iter().any(|d| d.log.is_some()) {
            async_std::fs::create_dir_all(&self.config.log_dir)
                .await
                .map_err(|e| DebianError::IoPath(self.config.log_dir.display().to_string(), e))?;
        }

        if self.options.predelete {
            for run in runs.iter_mut() {
                let res = run
                    .state
                    .predelete(
                        &mut run.store,
                        run.logger.as_ref(),
                        run.ignore_deletions,
                        &self.interrupted,
                    )
                    .await;

                match res {
                    Ok(report) => summary.removed += report.removed,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!("{}: {}", run.target(), e);
                        summary.failed.push((run.target().clone(), e));
                    }
                }
            }
        }

        let mut queue = DownloadQueue::new();
        for run in &runs {
            if summary.failed.iter().all(|(t, _)| t != run.target()) {
                run.state.enqueue(|files, provenance| queue.request(files, provenance));
            }
        }

        if !queue.is_empty() {
            info!("acquiring {} files", queue.len());
            let failures = queue.run(&agent, self.options.max_parallel_io).await;
            self.interrupted.check()?;

            if !failures.is_empty() {
                if self.options.keep_going {
                    warn!("{} files unavailable, continuing anyway", failures.len());
                } else {
                    error!("{} files unavailable, not installing anything", failures.len());
                    return Err(DebianError::DownloadFailures(failures.len()));
                }
            }
        }

        for mut run in runs {
            if summary.failed.iter().any(|(t, _)| t == run.target()) {
                continue;
            }

            self.interrupted.check()?;

            let res = run
                .state
                .install(
                    &mut run.store,
                    &agent,
                    run.logger.as_ref(),
                    run.ignore_deletions,
                    &self.interrupted,
                )
                .await;

            match res {
                Ok(report) => {
                    summary.committed += 1;
                    summary.added += report.added;
                    summary.removed += report.removed;
                    summary.package_failures.extend(
                        report
                            .failed
                            .into_iter()
                            .map(|(name, e)| (run.target().clone(), name, e)),
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("{}: {}", run.target(), e);
                    summary.failed.push((run.target().clone(), e));
                }
            }
        }

        Ok(summary)
    }

    /// Search and commit.
    pub async fn run(&self, source: &dyn SyncSource, codenames: &[String]) -> Result<SyncSummary> {
        let search = self.search(source, codenames).await?;
        self.commit(source, search).await
    }
}
