// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Detection of destructive merge results. */

use super::MergeState;

/// Minimum number of deletions for a big delete.
pub const BIG_DELETE_MINIMUM: usize = 10;

/// A delete is big if fewer than this many installed packages exist per deleted one.
pub const BIG_DELETE_FACTOR: usize = 5;

impl MergeState {
    fn installed_and_deleted(&self) -> (usize, usize) {
        self.iter()
            .filter(|e| e.installed.is_some())
            .fold((0, 0), |(total, deleted), e| {
                (total + 1, deleted + usize::from(e.deleted))
            })
    }

    /// Whether committing would delete an unusually large share of the target.
    ///
    /// Callers should not commit such a target unless explicitly told to.
    pub fn is_big_delete(&self) -> bool {
        let (total, deleted) = self.installed_and_deleted();

        deleted >= BIG_DELETE_MINIMUM && total / deleted < BIG_DELETE_FACTOR
    }

    /// Whether committing would delete any installed package.
    pub fn would_delete(&self) -> bool {
        self.iter().any(|e| e.installed.is_some() && e.deleted)
    }
}
