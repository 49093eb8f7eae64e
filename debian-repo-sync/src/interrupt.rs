// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Cooperative cancellation. */

use {
    crate::error::{DebianError, Result},
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A shared flag signaling that work should stop.
///
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct Interrupted(Arc<AtomicBool>);

impl Interrupted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that work stops.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error with [DebianError::Cancelled] if interrupted.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(DebianError::Cancelled)
        } else {
            Ok(())
        }
    }
}
