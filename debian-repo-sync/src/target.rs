// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Identification of package targets.

A *target* is one package index of a distribution: the packages of one
package type for one component and architecture. Each target is merged and
committed independently of all others.
*/

use {
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
    strum_macros::{Display as StrumDisplay, EnumIter, EnumString},
};

/// The pseudo architecture holding source packages.
pub const SOURCE_ARCHITECTURE: &str = "source";

/// The architecture of architecture independent binary packages.
pub const ALL_ARCHITECTURE: &str = "all";

/// Flavor of packages held by a target.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageType {
    /// Binary packages (`.deb`).
    Deb,
    /// Installer binary packages (`.udeb`).
    Udeb,
    /// Source packages (`.dsc` and friends).
    Dsc,
}

impl PackageType {
    /// Whether packages of this type are source packages.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Dsc)
    }
}

/// Identifies a target within a repository.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetIdentifier {
    pub codename: String,
    pub component: String,
    pub architecture: String,
    pub package_type: PackageType,
}

impl TargetIdentifier {
    /// Construct a new instance.
    pub fn new(
        codename: impl ToString,
        component: impl ToString,
        architecture: impl ToString,
        package_type: PackageType,
    ) -> Self {
        Self {
            codename: codename.to_string(),
            component: component.to_string(),
            architecture: architecture.to_string(),
            package_type,
        }
    }

    /// The same component, architecture and package type in another distribution.
    pub fn with_codename(&self, codename: &str) -> Self {
        Self {
            codename: codename.to_string(),
            ..self.clone()
        }
    }
}

impl Display for TargetIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.package_type == PackageType::Udeb {
            f.write_str("u|")?;
        }

        write!(
            f,
            "{}|{}|{}",
            self.codename, self.component, self.architecture
        )
    }
}

#[cfg(test)]
mod test {
    use {super::*, std::str::FromStr, strum::IntoEnumIterator};

    #[test]
    fn identifier_display() {
        assert_eq!(
            TargetIdentifier::new("bullseye", "main", "amd64", PackageType::Deb).to_string(),
            "bullseye|main|amd64"
        );
        assert_eq!(
            TargetIdentifier::new("bullseye", "main", "amd64", PackageType::Udeb).to_string(),
            "u|bullseye|main|amd64"
        );
    }

    #[test]
    fn package_type_strings() {
        assert_eq!(PackageType::from_str("dsc").ok(), Some(PackageType::Dsc));
        assert_eq!(PackageType::Udeb.to_string(), "udeb");

        for package_type in PackageType::iter() {
            assert_eq!(
                PackageType::from_str(&package_type.to_string()).ok(),
                Some(package_type)
            );
            assert_eq!(package_type.is_source(), package_type == PackageType::Dsc);
        }
    }
}
