// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Committing merge results to targets. */

use {
    super::{Entry, MergeState, PendingInstall},
    crate::{
        candidate::{PoolFile, Provenance},
        download::DownloadAgent,
        error::{DebianError, Result},
        interrupt::Interrupted,
        logger::{ChangeLogger, ChangeRecord},
        store::TargetStore,
    },
    log::{info, warn},
    std::sync::Arc,
};

/// What a commit did to a target.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Packages added or replaced.
    pub added: usize,
    /// Packages removed.
    pub removed: usize,
    /// Packages that could not be committed, with the reason.
    pub failed: Vec<(String, DebianError)>,
}

impl CommitReport {
    /// Whether nothing was changed and nothing failed.
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.failed.is_empty()
    }
}

impl MergeState {
    /// Commit the merge result to the target.
    ///
    /// Pending packages have their files acquired through `agent` and are
    /// added. Packages marked for deletion are removed unless
    /// `ignore_deletions` is set. Packages whose files cannot be acquired are
    /// recorded in [CommitReport::failed] and skipped. Any other error stops the
    /// commit, keeping changes made so far.
    pub async fn install(
        &self,
        store: &mut dyn TargetStore,
        agent: &dyn DownloadAgent,
        logger: &dyn ChangeLogger,
        ignore_deletions: bool,
        interrupted: &Interrupted,
    ) -> Result<CommitReport> {
        let mut report = CommitReport::default();

        store.begin_session().await?;
        let res = self
            .install_entries(
                store,
                agent,
                logger,
                ignore_deletions,
                interrupted,
                &mut report,
            )
            .await;
        let finished = store.finish_session().await;

        res?;
        finished?;

        if !report.is_empty() {
            info!(
                "{}: {} added, {} removed, {} failed",
                self.target,
                report.added,
                report.removed,
                report.failed.len()
            );
        }

        Ok(report)
    }

    async fn install_entries(
        &self,
        store: &mut dyn TargetStore,
        agent: &dyn DownloadAgent,
        logger: &dyn ChangeLogger,
        ignore_deletions: bool,
        interrupted: &Interrupted,
        report: &mut CommitReport,
    ) -> Result<()> {
        for entry in self.iter() {
            if entry.deleted {
                if entry.installed.is_none() || entry.predeleted {
                    continue;
                }

                interrupted.check()?;

                if ignore_deletions {
                    warn!(
                        "{}: not removing {} as deletions are ignored",
                        self.target, entry.name
                    );
                    continue;
                }

                self.remove_entry(store, logger, entry).await?;
                report.removed += 1;
            } else if let Some(pending) = &entry.pending {
                interrupted.check()?;

                match self
                    .add_entry(store, agent, logger, entry, pending)
                    .await
                {
                    Ok(()) => report.added += 1,
                    Err(e) if e.is_per_package() => {
                        warn!(
                            "{}: unable to add {} {}: {}",
                            self.target, entry.name, pending.version, e
                        );
                        report.failed.push((entry.name.clone(), e));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    async fn add_entry(
        &self,
        store: &mut dyn TargetStore,
        agent: &dyn DownloadAgent,
        logger: &dyn ChangeLogger,
        entry: &Entry,
        pending: &PendingInstall,
    ) -> Result<()> {
        agent.ensure(&pending.files, &pending.provenance).await?;

        let control = store
            .apply_override(&entry.name, &pending.control)
            .unwrap_or_else(|| pending.control.clone());

        store
            .add_package(&entry.name, &pending.version, control, &pending.files)
            .await?;

        logger.record(&ChangeRecord {
            target: &self.target,
            name: &entry.name,
            old_version: if entry.predeleted {
                None
            } else {
                entry.installed.as_deref()
            },
            new_version: Some(&pending.version),
            files: &pending.files,
            provenance: Some(&pending.provenance),
        })
    }

    async fn remove_entry(
        &self,
        store: &mut dyn TargetStore,
        logger: &dyn ChangeLogger,
        entry: &Entry,
    ) -> Result<()> {
        store.remove_package(&entry.name).await?;

        logger.record(&ChangeRecord {
            target: &self.target,
            name: &entry.name,
            old_version: entry.installed.as_deref(),
            new_version: None,
            files: &[],
            provenance: None,
        })
    }

    /// Remove installed packages that will be deleted or replaced, ahead of [Self::install].
    ///
    /// Replaced packages are added again by the later install. With
    /// `ignore_deletions`, packages only marked for deletion are kept.
    pub async fn predelete(
        &mut self,
        store: &mut dyn TargetStore,
        logger: &dyn ChangeLogger,
        ignore_deletions: bool,
        interrupted: &Interrupted,
    ) -> Result<CommitReport> {
        let indices = self
            .indices()
            .filter(|&i| {
                let entry = &self.entries[i];

                entry.installed.is_some()
                    && !entry.predeleted
                    && ((entry.deleted && !ignore_deletions)
                        || (!entry.deleted && entry.pending.is_some()))
            })
            .collect::<Vec<_>>();

        let mut report = CommitReport::default();
        if indices.is_empty() {
            return Ok(report);
        }

        store.begin_session().await?;

        let mut res = Ok(());
        for i in indices {
            if let Err(e) = interrupted.check() {
                res = Err(e);
                break;
            }

            if let Err(e) = self.remove_entry(store, logger, &self.entries[i]).await {
                res = Err(e);
                break;
            }

            self.entries[i].predeleted = true;
            report.removed += 1;
        }

        let finished = store.finish_session().await;
        res?;
        finished?;

        Ok(report)
    }

    /// Request the files of every pending install.
    ///
    /// Returns the number of packages files were requested for.
    pub fn enqueue<F>(&self, mut request: F) -> usize
    where
        F: FnMut(&[PoolFile], &Arc<Provenance>),
    {
        let mut count = 0;

        for entry in self.iter().filter(|e| !e.deleted) {
            if let Some(pending) = &entry.pending {
                request(&pending.files, &pending.provenance);
                count += 1;
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            candidate::Candidate,
            merge::{CandidateStream, EntryStatus},
            package_version::DebianVersionComparator,
            policy::Decision,
            target::TargetIdentifier,
            testing::{stream_of, MemoryTargetStore, RecordingAgent, RecordingLogger, StoreCall},
        },
    };

    fn verdict(decision: Decision) -> impl Fn(&TargetIdentifier, &Candidate, Option<&str>) -> Decision {
        move |_: &TargetIdentifier, _: &Candidate, _: Option<&str>| decision
    }

    async fn merged(
        store: &MemoryTargetStore,
        streams: &[(Decision, &[(&str, &str)])],
    ) -> Result<MergeState> {
        let mut state = MergeState::init(store, Arc::new(DebianVersionComparator))?;

        for (decision, candidates) in streams {
            let policy = verdict(*decision);
            let stream = CandidateStream::new(&policy, Provenance::new("rule", "upstream"));
            state
                .process_stream(store, &stream, stream_of(candidates), &Interrupted::new())
                .await?;
        }

        Ok(state)
    }

    #[tokio::test]
    async fn no_candidates_no_changes() -> Result<()> {
        let mut store = MemoryTargetStore::with_packages(&[("pkgA", "1.0")]);
        let state = merged(&store, &[]).await?;

        let report = state
            .install(
                &mut store,
                &RecordingAgent::default(),
                &RecordingLogger::default(),
                false,
                &Interrupted::new(),
            )
            .await?;

        assert!(report.is_empty());
        assert!(store.calls().is_empty());
        assert!(!state.would_delete());

        Ok(())
    }

    #[tokio::test]
    async fn upgrade_adds_once() -> Result<()> {
        let mut store = MemoryTargetStore::with_packages(&[("pkgA", "1.0")]);
        let state = merged(&store, &[(Decision::Upgrade, &[("pkgA", "2.0")])]).await?;

        assert_eq!(
            state.entry("pkgA").and_then(|e| e.best_version()),
            Some("2.0")
        );

        let agent = RecordingAgent::default();
        let logger = RecordingLogger::default();
        let report = state
            .install(&mut store, &agent, &logger, false, &Interrupted::new())
            .await?;

        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Add("pkgA".into(), "2.0".into())]
        );
        assert_eq!(agent.ensured(), vec!["pool/main/p/pkgA/pkgA_2.0_amd64.deb"]);
        assert_eq!(logger.lines(), vec!["replace test deb main amd64 pkgA 2.0 1.0"]);

        Ok(())
    }

    #[tokio::test]
    async fn delete_all_then_hold() -> Result<()> {
        let mut store = MemoryTargetStore::with_packages(&[("pkgA", "1.0"), ("pkgB", "1.0")]);
        let mut state = merged(&store, &[]).await?;
        state.mark_all_for_deletion();

        let policy = verdict(Decision::Hold);
        state
            .process_stream(
                &store,
                &CandidateStream::new(&policy, Provenance::new("rule", "upstream")),
                stream_of(&[("pkgB", "1.0")]),
                &Interrupted::new(),
            )
            .await?;

        assert_eq!(
            state.entry("pkgA").map(|e| e.status()),
            Some(EntryStatus::Delete)
        );
        assert_eq!(
            state.entry("pkgB").map(|e| e.status()),
            Some(EntryStatus::Kept)
        );
        assert!(state.would_delete());

        let report = state
            .install(
                &mut store,
                &RecordingAgent::default(),
                &RecordingLogger::default(),
                false,
                &Interrupted::new(),
            )
            .await?;

        assert_eq!(report.removed, 1);
        assert_eq!(store.calls(), vec![StoreCall::Remove("pkgA".into())]);

        Ok(())
    }

    #[tokio::test]
    async fn ignored_deletions_are_kept() -> Result<()> {
        let mut store = MemoryTargetStore::with_packages(&[("pkgA", "1.0"), ("pkgB", "1.0")]);
        let mut state = merged(&store, &[]).await?;
        state.mark_all_for_deletion();

        let report = state
            .install(
                &mut store,
                &RecordingAgent::default(),
                &RecordingLogger::default(),
                true,
                &Interrupted::new(),
            )
            .await?;

        assert!(report.is_empty());
        assert!(store.calls().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn missing_files_are_skipped() -> Result<()> {
        let mut store = MemoryTargetStore::new();
        let state = merged(
            &store,
            &[(Decision::Upgrade, &[("a", "1"), ("b", "1"), ("c", "1")])],
        )
        .await?;

        let agent = RecordingAgent::missing(&["pool/main/b/b/b_1_amd64.deb"]);
        let report = state
            .install(
                &mut store,
                &agent,
                &RecordingLogger::default(),
                false,
                &Interrupted::new(),
            )
            .await?;

        assert_eq!(report.added, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(matches!(report.failed[0].1, DebianError::MissingFile(_)));
        assert!(store.session_closed());

        Ok(())
    }

    #[tokio::test]
    async fn interrupted_commit_keeps_progress() -> Result<()> {
        let mut store = MemoryTargetStore::new();
        let state = merged(&store, &[(Decision::Upgrade, &[("a", "1"), ("b", "1")])]).await?;

        let interrupted = Interrupted::new();
        let logger = RecordingLogger::interrupting_after(1, interrupted.clone());
        let res = state
            .install(
                &mut store,
                &RecordingAgent::default(),
                &logger,
                false,
                &interrupted,
            )
            .await;

        assert!(matches!(res, Err(DebianError::Cancelled)));
        assert_eq!(store.calls(), vec![StoreCall::Add("a".into(), "1".into())]);
        assert!(store.session_closed());

        Ok(())
    }

    #[tokio::test]
    async fn predelete_then_install() -> Result<()> {
        let mut store = MemoryTargetStore::with_packages(&[("a", "1"), ("b", "1"), ("c", "1")]);
        let mut state = merged(
            &store,
            &[
                (Decision::Upgrade, &[("a", "2")]),
                (Decision::Supersede, &[("b", "2")]),
            ],
        )
        .await?;

        let logger = RecordingLogger::default();
        let report = state
            .predelete(&mut store, &logger, false, &Interrupted::new())
            .await?;
        assert_eq!(report.removed, 2);
        assert!(state.entry("a").map(|e| e.is_predeleted()).unwrap_or(false));

        let report = state
            .install(
                &mut store,
                &RecordingAgent::default(),
                &logger,
                false,
                &Interrupted::new(),
            )
            .await?;
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Remove("a".into()),
                StoreCall::Remove("b".into()),
                StoreCall::Add("a".into(), "2".into()),
            ]
        );
        assert_eq!(
            logger.lines(),
            vec![
                "remove test deb main amd64 a 1",
                "remove test deb main amd64 b 1",
                "add test deb main amd64 a 2",
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn enqueue_requests_pending_files() -> Result<()> {
        let store = MemoryTargetStore::with_packages(&[("a", "1"), ("b", "1")]);
        let state = merged(
            &store,
            &[(Decision::Upgrade, &[("a", "2"), ("b", "1"), ("c", "1")])],
        )
        .await?;

        let mut keys = vec![];
        let count = state.enqueue(|files, provenance| {
            assert_eq!(provenance.source, "upstream");
            keys.extend(files.iter().map(|f| f.key.clone()));
        });

        assert_eq!(count, 2);
        assert_eq!(
            keys,
            vec!["pool/main/a/a/a_2_amd64.deb", "pool/main/c/c/c_1_amd64.deb"]
        );

        Ok(())
    }
}
