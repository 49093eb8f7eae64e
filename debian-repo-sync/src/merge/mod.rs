// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Merging of candidate streams into a target.

A [MergeState] holds one entry per package name of a target, seeded from the
packages the target has committed. Streams of [Candidate]s are merged into it
one after another. Each candidate is located in the name ordered entry list
and a [DecisionPolicy] decides what becomes of it. Once all streams are merged,
the state is committed (see [MergeState::install]) or reported on (see
[MergeState::dump]).

Streams are expected to be mostly sorted by name. The merge keeps a cursor
into the entry list that only moves forward while the stream is ascending, so
merging a sorted stream is linear. An out of order candidate restarts the
search from the head of the list.
*/

mod commit;
mod report;
mod safety;

pub use {
    commit::CommitReport,
    report::{DumpRecord, DumpStyle},
};

use {
    crate::{
        candidate::{Candidate, PoolFile, Provenance},
        control::ControlParagraph,
        error::{DebianError, Result},
        interrupt::Interrupted,
        package_version::VersionComparator,
        policy::{Decision, DecisionPolicy},
        store::TargetStore,
        target::TargetIdentifier,
    },
    log::{debug, warn},
    std::{cmp::Ordering, sync::Arc},
};

/// A version waiting to be committed for an entry.
#[derive(Clone, Debug)]
pub struct PendingInstall {
    pub version: String,
    pub control: ControlParagraph<'static>,
    pub files: Vec<PoolFile>,
    pub provenance: Arc<Provenance>,
}

/// What committing will do to an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryStatus {
    /// The committed version stays.
    Kept,
    /// A package not in the target will be added.
    New,
    /// The committed version will be replaced.
    Upgrade,
    /// The committed package will be removed.
    Delete,
    /// A package not in the target was superseded before being added.
    Dropped,
}

/// State of one package name within a [MergeState].
#[derive(Clone, Debug)]
pub struct Entry {
    name: String,
    installed: Option<String>,
    pending: Option<PendingInstall>,
    deleted: bool,
    predeleted: bool,
    architecture: String,
    next: Option<usize>,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version committed to the target when the state was initialized.
    pub fn installed_version(&self) -> Option<&str> {
        self.installed.as_deref()
    }

    /// The version currently winning for this entry.
    pub fn best_version(&self) -> Option<&str> {
        match &self.pending {
            Some(pending) => Some(&pending.version),
            None => self.installed.as_deref(),
        }
    }

    /// The install waiting to be committed, if the best version is not the installed one.
    pub fn pending(&self) -> Option<&PendingInstall> {
        self.pending.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Whether the installed version was already removed by [MergeState::predelete].
    pub fn is_predeleted(&self) -> bool {
        self.predeleted
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn status(&self) -> EntryStatus {
        match (self.deleted, &self.installed, &self.pending) {
            (true, Some(_), _) => EntryStatus::Delete,
            (true, None, _) => EntryStatus::Dropped,
            (false, None, Some(_)) => EntryStatus::New,
            (false, Some(_), Some(_)) => EntryStatus::Upgrade,
            (false, _, None) => EntryStatus::Kept,
        }
    }
}

/// Result of merging candidates.
///
/// Errors are reported through [Result] and always dominate.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MergeOutcome {
    /// Nothing changed.
    Nothing,
    /// At least one entry changed.
    Applied,
}

impl MergeOutcome {
    /// Combine with another outcome, the worse one winning.
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Position within the entry list.
///
/// `after` is the entry preceding `at`, `None` meaning before the head. `at`
/// being `None` means the tail.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Cursor {
    after: Option<usize>,
    at: Option<usize>,
}

/// A stream of candidates and how to decide on them.
pub struct CandidateStream<'a> {
    pub policy: &'a dyn DecisionPolicy,
    pub provenance: Arc<Provenance>,
}

impl<'a> CandidateStream<'a> {
    pub fn new(policy: &'a dyn DecisionPolicy, provenance: Provenance) -> Self {
        Self {
            policy,
            provenance: Arc::new(provenance),
        }
    }
}

/// Entries of one target and the decisions made on them.
pub struct MergeState {
    target: TargetIdentifier,
    comparator: Arc<dyn VersionComparator>,
    entries: Vec<Entry>,
    head: Option<usize>,
    cursor: Cursor,
    restarts: usize,
}

impl std::fmt::Debug for MergeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeState")
            .field("target", &self.target)
            .field("entries", &self.entries)
            .field("head", &self.head)
            .field("cursor", &self.cursor)
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl MergeState {
    /// Seed a state from the packages a target has committed.
    ///
    /// Packages must arrive in strictly ascending name order. Anything else is
    /// an [DebianError::InternalConsistency] error.
    pub fn init(store: &dyn TargetStore, comparator: Arc<dyn VersionComparator>) -> Result<Self> {
        let target = store.identifier().clone();
        let mut entries: Vec<Entry> = vec![];

        for record in store.packages() {
            let record = record?;
            let index = entries.len();

            if let Some(last) = entries.last_mut() {
                if record.name.as_str() <= last.name.as_str() {
                    return Err(DebianError::InternalConsistency(format!(
                        "packages of {} not sorted: {} follows {}",
                        target, record.name, last.name
                    )));
                }

                last.next = Some(index);
            }

            entries.push(Entry {
                name: record.name,
                installed: Some(record.version),
                pending: None,
                deleted: false,
                predeleted: false,
                architecture: record.architecture,
                next: None,
            });
        }

        debug!("{}: {} packages in baseline", target, entries.len());

        let head = if entries.is_empty() { None } else { Some(0) };

        Ok(Self {
            target,
            comparator,
            entries,
            head,
            cursor: Cursor { after: None, at: head },
            restarts: 0,
        })
    }

    pub fn target(&self) -> &TargetIdentifier {
        &self.target
    }

    /// The number of times the cursor had to restart from the head.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.indices().map(move |i| &self.entries[i])
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.iter().find(|e| e.name == name)
    }

    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head, move |&i| self.entries[i].next)
    }

    /// Prepare for a new candidate stream by moving the cursor to the head.
    pub fn begin_stream(&mut self) {
        self.cursor = Cursor {
            after: None,
            at: self.head,
        };
    }

    /// Mark every entry for deletion.
    ///
    /// Entries only survive if a later stream reinstates them.
    pub fn mark_all_for_deletion(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.deleted = true;
        }
    }

    /// Merge all candidates of a stream.
    ///
    /// Stops at the first error, leaving changes made so far in place.
    pub async fn process_stream(
        &mut self,
        store: &dyn TargetStore,
        stream: &CandidateStream<'_>,
        candidates: impl IntoIterator<Item = Result<Candidate>>,
        interrupted: &Interrupted,
    ) -> Result<MergeOutcome> {
        self.begin_stream();

        let mut outcome = MergeOutcome::Nothing;

        for candidate in candidates {
            interrupted.check()?;
            outcome = outcome.combine(self.process_candidate(store, stream, &candidate?).await?);
        }

        Ok(outcome)
    }

    /// Merge a single candidate.
    pub async fn process_candidate(
        &mut self,
        store: &dyn TargetStore,
        stream: &CandidateStream<'_>,
        candidate: &Candidate,
    ) -> Result<MergeOutcome> {
        let name = candidate.name.as_str();

        loop {
            if let Some(at) = self.cursor.at {
                match name.cmp(self.entries[at].name.as_str()) {
                    Ordering::Equal => return self.merge_existing(at, store, stream, candidate).await,
                    Ordering::Greater => {
                        self.cursor = Cursor {
                            after: Some(at),
                            at: self.entries[at].next,
                        };
                        continue;
                    }
                    Ordering::Less => {}
                }
            }

            // The candidate sorts before `at`. It belongs right here unless it
            // also sorts before `after`.
            match self.cursor.after {
                None => break,
                Some(after) => match name.cmp(self.entries[after].name.as_str()) {
                    Ordering::Equal => {
                        return self.merge_existing(after, store, stream, candidate).await
                    }
                    Ordering::Greater => break,
                    Ordering::Less => {
                        self.cursor = Cursor {
                            after: None,
                            at: self.head,
                        };
                        self.restarts += 1;
                    }
                },
            }
        }

        self.merge_new(store, stream, candidate).await
    }

    fn policy_error(&self, candidate: &Candidate) -> DebianError {
        DebianError::PolicyError {
            target: self.target.to_string(),
            package: candidate.name.clone(),
        }
    }

    async fn pending_install(
        store: &dyn TargetStore,
        stream: &CandidateStream<'_>,
        candidate: &Candidate,
    ) -> Result<PendingInstall> {
        let data = store.install_data(candidate).await?;

        Ok(PendingInstall {
            version: candidate.version.clone(),
            control: data.control,
            files: data.files,
            provenance: stream.provenance.clone(),
        })
    }

    /// Insert a candidate at the cursor.
    async fn merge_new(
        &mut self,
        store: &dyn TargetStore,
        stream: &CandidateStream<'_>,
        candidate: &Candidate,
    ) -> Result<MergeOutcome> {
        let decision = if self.target.package_type.is_source() && candidate.is_architecture_all() {
            Decision::LoudNo
        } else {
            stream.policy.decide(&self.target, candidate, None)
        };

        match decision {
            Decision::Upgrade => {}
            Decision::LoudNo => {
                warn!(
                    "{}: not adding {} {} from {}",
                    self.target, candidate.name, candidate.version, stream.provenance
                );
                return Ok(MergeOutcome::Nothing);
            }
            Decision::Error => return Err(self.policy_error(candidate)),
            Decision::No | Decision::Hold | Decision::Supersede => {
                return Ok(MergeOutcome::Nothing)
            }
        }

        let pending = Self::pending_install(store, stream, candidate).await?;

        let index = self.entries.len();
        self.entries.push(Entry {
            name: candidate.name.clone(),
            installed: None,
            pending: Some(pending),
            deleted: false,
            predeleted: false,
            architecture: candidate.architecture.clone(),
            next: self.cursor.at,
        });

        match self.cursor.after {
            Some(after) => self.entries[after].next = Some(index),
            None => self.head = Some(index),
        }
        self.cursor.at = Some(index);

        Ok(MergeOutcome::Applied)
    }

    /// Apply a candidate to the existing entry at `index`.
    async fn merge_existing(
        &mut self,
        index: usize,
        store: &dyn TargetStore,
        stream: &CandidateStream<'_>,
        candidate: &Candidate,
    ) -> Result<MergeOutcome> {
        let entry = &self.entries[index];

        let best = entry.best_version().ok_or_else(|| {
            DebianError::InternalConsistency(format!(
                "{}: entry {} has no version",
                self.target, entry.name
            ))
        })?;

        let newer = self
            .comparator
            .compare(&candidate.name, &candidate.version, best)?
            == Ordering::Greater;

        if !newer && !entry.deleted {
            return Ok(MergeOutcome::Nothing);
        }

        let decision = stream
            .policy
            .decide(&self.target, candidate, entry.installed.as_deref());

        match decision {
            Decision::No => Ok(MergeOutcome::Nothing),
            Decision::LoudNo => {
                warn!(
                    "{}: not upgrading {} to {} from {}",
                    self.target, candidate.name, candidate.version, stream.provenance
                );
                Ok(MergeOutcome::Nothing)
            }
            Decision::Error => Err(self.policy_error(candidate)),
            Decision::Hold => {
                self.entries[index].deleted = false;
                Ok(MergeOutcome::Applied)
            }
            Decision::Supersede => {
                self.entries[index].deleted = true;
                Ok(MergeOutcome::Applied)
            }
            Decision::Upgrade => {
                if entry.installed.as_deref() == Some(candidate.version.as_str()) {
                    let entry = &mut self.entries[index];
                    entry.pending = None;
                    entry.deleted = false;
                } else {
                    let pending = Self::pending_install(store, stream, candidate).await?;
                    let entry = &mut self.entries[index];
                    entry.pending = Some(pending);
                    entry.deleted = false;
                }

                Ok(MergeOutcome::Applied)
            }
        }
    }
}
