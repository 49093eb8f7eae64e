// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Recording of committed changes.

Every package added to, replaced in, or removed from a target is reported to a
[ChangeLogger]. This is distinct from diagnostic logging through the `log`
facade: change records are the history of a distribution.
*/

use {
    crate::{
        candidate::{PoolFile, Provenance},
        error::{DebianError, Result},
        target::TargetIdentifier,
    },
    log::info,
    std::{
        io::Write,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    },
    strum_macros::Display,
};

/// Kind of change made to a target.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Replace,
    Remove,
}

/// A change committed to a target.
#[derive(Clone, Debug)]
pub struct ChangeRecord<'a> {
    pub target: &'a TargetIdentifier,
    pub name: &'a str,
    pub old_version: Option<&'a str>,
    pub new_version: Option<&'a str>,
    pub files: &'a [PoolFile],
    pub provenance: Option<&'a Provenance>,
}

impl<'a> ChangeRecord<'a> {
    pub fn action(&self) -> ChangeAction {
        match (self.old_version, self.new_version) {
            (None, _) => ChangeAction::Add,
            (Some(_), Some(_)) => ChangeAction::Replace,
            (Some(_), None) => ChangeAction::Remove,
        }
    }

    /// Render in the distribution log line format, without timestamp.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "{} {} {} {} {} {}",
            self.action(),
            self.target.codename,
            self.target.package_type,
            self.target.component,
            self.target.architecture,
            self.name,
        );

        for version in [self.new_version, self.old_version].into_iter().flatten() {
            line.push(' ');
            line.push_str(version);
        }

        line
    }
}

/// Receives records of committed changes.
pub trait ChangeLogger: Send + Sync {
    fn record(&self, change: &ChangeRecord<'_>) -> Result<()>;
}

/// Forwards change records to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogChangeLogger;

impl ChangeLogger for LogChangeLogger {
    fn record(&self, change: &ChangeRecord<'_>) -> Result<()> {
        match change.provenance {
            Some(provenance) => info!("{} ({})", change.log_line(), provenance),
            None => info!("{}", change.log_line()),
        }

        Ok(())
    }
}

/// Appends change records to a file, one timestamped line per change.
#[derive(Debug)]
pub struct FileChangeLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileChangeLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }
}

impl ChangeLogger for FileChangeLogger {
    fn record(&self, change: &ChangeRecord<'_>) -> Result<()> {
        let line = format!(
            "{} {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            change.log_line()
        );

        let _guard = self
            .lock
            .lock()
            .map_err(|_| DebianError::InternalConsistency("change log lock poisoned".into()))?;

        let mut fh = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DebianError::IoPath(self.path.display().to_string(), e))?;
        fh.write_all(line.as_bytes())
            .map_err(|e| DebianError::IoPath(self.path.display().to_string(), e))?;

        Ok(())
    }
}

/// Sends change records to several loggers.
#[derive(Clone, Default)]
pub struct MultiChangeLogger {
    loggers: Vec<Arc<dyn ChangeLogger>>,
}

impl MultiChangeLogger {
    pub fn new(loggers: Vec<Arc<dyn ChangeLogger>>) -> Self {
        Self { loggers }
    }

    pub fn push(&mut self, logger: Arc<dyn ChangeLogger>) {
        self.loggers.push(logger);
    }
}

impl ChangeLogger for MultiChangeLogger {
    fn record(&self, change: &ChangeRecord<'_>) -> Result<()> {
        for logger in &self.loggers {
            logger.record(change)?;
        }

        Ok(())
    }
}
