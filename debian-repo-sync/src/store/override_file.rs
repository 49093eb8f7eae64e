// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-package control field overrides.

Override files hold one override per line in the form `package field value`.
Empty lines and lines starting with `#` are ignored.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{DebianError, Result},
    },
    std::{borrow::Cow, collections::HashMap, io::BufRead, path::Path},
};

/// A set of field overrides keyed by package name.
#[derive(Clone, Debug, Default)]
pub struct OverrideFile {
    packages: HashMap<String, Vec<(String, String)>>,
}

impl OverrideFile {
    /// Parse overrides from a reader.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut packages = HashMap::<String, Vec<(String, String)>>::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(3, char::is_whitespace);

            match (parts.next(), parts.next(), parts.next()) {
                (Some(package), Some(field), Some(value)) if !value.trim().is_empty() => {
                    packages
                        .entry(package.to_string())
                        .or_default()
                        .push((field.to_string(), value.trim().to_string()));
                }
                _ => {
                    return Err(DebianError::Config(format!(
                        "malformed override line: {}",
                        line
                    )));
                }
            }
        }

        Ok(Self { packages })
    }

    /// Parse overrides from a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let fh = std::fs::File::open(path)
            .map_err(|e| DebianError::IoPath(path.display().to_string(), e))?;

        Self::from_reader(std::io::BufReader::new(fh))
    }

    /// Apply overrides for `package` to a control paragraph.
    ///
    /// Returns `None` if there are no overrides for the package or all of them
    /// already hold.
    pub fn apply(
        &self,
        package: &str,
        control: &ControlParagraph<'static>,
    ) -> Option<ControlParagraph<'static>> {
        let overrides = self.packages.get(package)?;

        if overrides
            .iter()
            .all(|(field, value)| control.field_str(field) == Some(value.as_str()))
        {
            return None;
        }

        let mut control = control.clone();
        for (field, value) in overrides {
            control.set_field_from_string(
                Cow::Owned(field.clone()),
                Cow::Owned(value.clone()),
            );
        }

        Some(control)
    }
}
