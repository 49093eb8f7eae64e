// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synchronizing package sets of Debian repository distributions.

A repository managed by this crate consists of *distributions* (identified by a
codename like `bookworm`), each divided into *targets*: one per component,
architecture and package type (`deb`, `udeb` or source `dsc`). What a target
holds is persisted by a [store::TargetStore].

Distributions are kept up to date by applying *rules* to them. Pull rules
offer the packages of another distribution of the same repository. Update
rules offer the packages listed in the indices of a mirrored upstream
repository. Each rule carries a filter list deciding, per package, whether
offered versions are installed, held, superseded or refused.

# A Tour of Functionality

The heart of this crate is the merge engine in the [merge] module. A
[merge::MergeState] starts from the packages a target has committed and merges
streams of [candidate::Candidate]s into it, consulting a
[policy::DecisionPolicy] for every candidate. Streams are expected, but not
required, to be sorted by package name; sorted streams merge in a single pass.
Nothing touches the target until [merge::MergeState::install] commits the
result, logging every change through a [logger::ChangeLogger] and acquiring
files through a [download::DownloadAgent].

The [sync] module ties this together for whole repositories: it searches all
targets of the selected distributions, refuses to commit targets that would
lose most of their packages, acquires all needed files in one batch and then
commits. [sync::pull::PullSource] and [sync::update::UpdateSource] implement
the two kinds of rules.

Repositories are described by a YAML [config::RepositoryConfig].

Supporting primitives: control paragraphs live in [control], version
comparison in [package_version], checksums and index decompression in [io].
*/

pub mod candidate;
pub mod config;
pub mod control;
pub mod download;
pub mod error;
pub mod interrupt;
pub mod io;
pub mod logger;
pub mod merge;
pub mod package_version;
pub mod policy;
pub mod store;
pub mod sync;
pub mod target;

#[cfg(test)]
mod testing;
