// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Decisions on candidate packages.

The merge engine does not know why a candidate should or should not replace
what a target holds. It asks a [DecisionPolicy] for a [Decision] and acts on
the verdict. Front-ends compose their policies from [FilterList]s.
*/

use {
    crate::{
        candidate::Candidate,
        error::{DebianError, Result},
        target::TargetIdentifier,
    },
    serde::{Deserialize, Serialize},
    std::{collections::HashMap, io::BufRead, path::Path, str::FromStr},
    strum_macros::{Display, EnumString},
};

/// Verdict on a candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Ignore the candidate.
    No,
    /// Ignore the candidate and warn about it.
    LoudNo,
    /// Make the candidate the version to commit.
    Upgrade,
    /// Keep the installed version, rescuing it from deletion.
    Hold,
    /// Mark the existing package for deletion without installing the candidate.
    Supersede,
    /// Abort processing of the stream.
    Error,
}

/// Decides what to do with candidates offered to a target.
pub trait DecisionPolicy: Sync {
    /// Decide on `candidate`.
    ///
    /// `old_version` is the version the target has committed, if any.
    fn decide(
        &self,
        target: &TargetIdentifier,
        candidate: &Candidate,
        old_version: Option<&str>,
    ) -> Decision;
}

impl<F> DecisionPolicy for F
where
    F: Fn(&TargetIdentifier, &Candidate, Option<&str>) -> Decision + Sync,
{
    fn decide(
        &self,
        target: &TargetIdentifier,
        candidate: &Candidate,
        old_version: Option<&str>,
    ) -> Decision {
        self(target, candidate, old_version)
    }
}

/// An action a filter list can assign to a package.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterAction {
    Install,
    Deinstall,
    Purge,
    Hold,
    Supersede,
    Error,
}

impl FilterAction {
    /// The verdict this action produces.
    pub fn decision(&self) -> Decision {
        match self {
            Self::Install => Decision::Upgrade,
            Self::Deinstall | Self::Purge => Decision::No,
            Self::Hold => Decision::Hold,
            Self::Supersede => Decision::Supersede,
            Self::Error => Decision::Error,
        }
    }
}

/// Assigns actions to packages by name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterList {
    default: FilterAction,
    packages: HashMap<String, FilterAction>,
}

impl Default for FilterList {
    fn default() -> Self {
        Self::new(FilterAction::Install)
    }
}

impl FilterList {
    /// Construct an empty list applying `default` to every package.
    pub fn new(default: FilterAction) -> Self {
        Self {
            default,
            packages: HashMap::new(),
        }
    }

    /// Set the action of a package.
    pub fn set(&mut self, package: impl ToString, action: FilterAction) {
        self.packages.insert(package.to_string(), action);
    }

    /// Add entries from `package action` lines.
    ///
    /// Empty lines and `#` comments are ignored.
    pub fn read_entries(&mut self, reader: impl BufRead) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut words = line.split_ascii_whitespace();

            match (words.next(), words.next(), words.next()) {
                (Some(package), Some(action), None) => {
                    let action = FilterAction::from_str(action)
                        .map_err(|_| DebianError::UnknownFilterAction(action.to_string()))?;
                    self.set(package, action);
                }
                _ => {
                    return Err(DebianError::Config(format!(
                        "malformed filter list line: {}",
                        line
                    )))
                }
            }
        }

        Ok(())
    }

    /// Add entries from a file of `package action` lines.
    pub fn read_path(&mut self, path: &Path) -> Result<()> {
        let fh = std::fs::File::open(path)
            .map_err(|e| DebianError::IoPath(path.display().to_string(), e))?;

        self.read_entries(std::io::BufReader::new(fh))
    }

    /// The action for a package.
    pub fn action(&self, package: &str) -> FilterAction {
        self.packages.get(package).copied().unwrap_or(self.default)
    }
}

/// A [DecisionPolicy] deciding by a [FilterList].
#[derive(Clone, Debug, Default)]
pub struct FilterListPolicy {
    filter: FilterList,
}

impl FilterListPolicy {
    pub fn new(filter: FilterList) -> Self {
        Self { filter }
    }
}

impl DecisionPolicy for FilterListPolicy {
    fn decide(
        &self,
        _target: &TargetIdentifier,
        candidate: &Candidate,
        _old_version: Option<&str>,
    ) -> Decision {
        self.filter.action(&candidate.name).decision()
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn filter_list_entries() -> Result<()> {
        let mut filter = FilterList::new(FilterAction::Deinstall);
        filter.read_entries(std::io::Cursor::new(indoc! {"
            # pinned
            foo install
            bar hold
            baz  supersede
        "}))?;

        assert_eq!(filter.action("foo"), FilterAction::Install);
        assert_eq!(filter.action("bar"), FilterAction::Hold);
        assert_eq!(filter.action("baz"), FilterAction::Supersede);
        assert_eq!(filter.action("other"), FilterAction::Deinstall);

        assert!(matches!(
            filter.read_entries(std::io::Cursor::new("foo upgrade\n")),
            Err(DebianError::UnknownFilterAction(_))
        ));
        assert!(filter
            .read_entries(std::io::Cursor::new("foo install extra\n"))
            .is_err());

        Ok(())
    }

    #[test]
    fn action_decisions() {
        assert_eq!(FilterAction::Install.decision(), Decision::Upgrade);
        assert_eq!(FilterAction::Purge.decision(), Decision::No);
        assert_eq!(FilterAction::Error.decision(), Decision::Error);
    }
}
