// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reporting on merge results without committing them. */

use {
    super::{EntryStatus, MergeState},
    crate::candidate::{PoolFile, Provenance},
};

/// How to render a [DumpRecord].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DumpStyle {
    /// Sentences for people.
    Human,
    /// Tab separated fields, `-` for absent values.
    Machine,
}

/// The planned change of one entry.
#[derive(Clone, Debug)]
pub struct DumpRecord<'a> {
    pub name: &'a str,
    pub status: EntryStatus,
    pub installed_version: Option<&'a str>,
    /// The version that would be committed, if it differs from the installed one.
    pub new_version: Option<&'a str>,
    pub files: &'a [PoolFile],
    pub provenance: Option<&'a Provenance>,
}

impl<'a> DumpRecord<'a> {
    /// Render as a single report entry.
    pub fn render(&self, style: DumpStyle) -> String {
        match style {
            DumpStyle::Human => self.render_human(),
            DumpStyle::Machine => self.render_machine(),
        }
    }

    fn render_human(&self) -> String {
        let installed = self.installed_version.unwrap_or("");
        let new = self.new_version.unwrap_or("");
        let from = self
            .provenance
            .map(|p| format!(" (from {})", p))
            .unwrap_or_default();
        let files = self
            .files
            .iter()
            .map(|f| f.key.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        match self.status {
            EntryStatus::Kept => format!("'{}': '{}' will be kept", self.name, installed),
            EntryStatus::Delete => format!("'{}': '{}' will be deleted", self.name, installed),
            EntryStatus::Dropped => format!("'{}': '{}' will not be added", self.name, new),
            EntryStatus::New => format!(
                "'{}': newly installed as '{}'{}:\n files needed: {}",
                self.name, new, from, files
            ),
            EntryStatus::Upgrade => format!(
                "'{}': '{}' will be upgraded to '{}'{}:\n files needed: {}",
                self.name, installed, new, from, files
            ),
        }
    }

    fn render_machine(&self) -> String {
        let status = match self.status {
            EntryStatus::Kept => "keep",
            EntryStatus::New => "new",
            EntryStatus::Upgrade => "upgrade",
            EntryStatus::Delete => "delete",
            EntryStatus::Dropped => "drop",
        };

        let (rule, source) = match self.provenance {
            Some(p) => (p.rule.as_str(), p.source.as_str()),
            None => ("-", "-"),
        };

        let files = if self.files.is_empty() {
            "-".to_string()
        } else {
            self.files
                .iter()
                .map(|f| f.key.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };

        [
            status,
            self.name,
            self.installed_version.unwrap_or("-"),
            self.new_version.unwrap_or("-"),
            rule,
            source,
            files.as_str(),
        ]
        .join("\t")
    }
}

impl MergeState {
    /// Describe the planned change of every entry, in name order.
    pub fn dump<F>(&self, mut emit: F)
    where
        F: FnMut(&DumpRecord<'_>),
    {
        for entry in self.iter() {
            let pending = entry.pending.as_ref();

            emit(&DumpRecord {
                name: &entry.name,
                status: entry.status(),
                installed_version: entry.installed.as_deref(),
                new_version: pending.map(|p| p.version.as_str()),
                files: pending.map(|p| p.files.as_slice()).unwrap_or(&[]),
                provenance: pending.map(|p| p.provenance.as_ref()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            candidate::Candidate,
            error::Result,
            interrupt::Interrupted,
            merge::CandidateStream,
            package_version::DebianVersionComparator,
            policy::Decision,
            target::TargetIdentifier,
            testing::{stream_of, MemoryTargetStore},
        },
        std::sync::Arc,
    };

    #[tokio::test]
    async fn dump_lines() -> Result<()> {
        let store = MemoryTargetStore::with_packages(&[("a", "1"), ("b", "1"), ("c", "1")]);
        let mut state = MergeState::init(&store, Arc::new(DebianVersionComparator))?;

        let policy = |_: &TargetIdentifier, c: &Candidate, _: Option<&str>| match c.name.as_str() {
            "c" => Decision::Supersede,
            _ => Decision::Upgrade,
        };
        state
            .process_stream(
                &store,
                &CandidateStream::new(&policy, Provenance::new("pull", "sid")),
                stream_of(&[("a", "2"), ("c", "2"), ("d", "1")]),
                &Interrupted::new(),
            )
            .await?;

        let mut human = vec![];
        let mut machine = vec![];
        state.dump(|r| {
            human.push(r.render(DumpStyle::Human));
            machine.push(r.render(DumpStyle::Machine));
        });

        assert_eq!(
            human,
            vec![
                "'a': '1' will be upgraded to '2' (from pull:sid):\n files needed: pool/main/a/a/a_2_amd64.deb",
                "'b': '1' will be kept",
                "'c': '1' will be deleted",
                "'d': newly installed as '1' (from pull:sid):\n files needed: pool/main/d/d/d_1_amd64.deb",
            ]
        );
        assert_eq!(
            machine,
            vec![
                "upgrade\ta\t1\t2\tpull\tsid\tpool/main/a/a/a_2_amd64.deb",
                "keep\tb\t1\t-\t-\t-\t-",
                "delete\tc\t1\t-\t-\t-\t-",
                "new\td\t-\t1\tpull\tsid\tpool/main/d/d/d_1_amd64.deb",
            ]
        );

        // Dumping does not change anything.
        let mut again = vec![];
        state.dump(|r| again.push(r.render(DumpStyle::Human)));
        assert_eq!(again, human);

        Ok(())
    }
}
