//! Elasticsearch versions the operator can run and upgrade between.
use semver::Version;

/// Inclusive range of versions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionRange {
    pub min: Version,
    pub max: Version,
}

impl VersionRange {
    pub fn contains(&self, version: &Version) -> bool {
        // Prereleases like 7.4.0-SNAPSHOT count as their release.
        let release = Version::new(version.major, version.minor, version.patch);
        self.min <= release && release <= self.max
    }
}

/// Versions a cluster of the major version of `version` can be made of, also
/// the versions it can be upgraded from. [`None`] for unsupported majors.
pub fn supported_versions(version: &Version) -> Option<VersionRange> {
    match version.major {
        6 => Some(VersionRange {
            min: Version::new(6, 8, 0),
            max: Version::new(6, 99, 99),
        }),
        7 => Some(VersionRange {
            min: Version::new(6, 8, 0),
            max: Version::new(7, 99, 99),
        }),
        _ => None,
    }
}

pub fn is_supported(version: &Version) -> bool {
    supported_versions(version).is_some_and(|range| range.contains(version))
}

/// Whether a cluster running `current` can be moved to `proposed`.
pub fn can_upgrade(current: &Version, proposed: &Version) -> bool {
    supported_versions(proposed).is_some_and(|range| range.min <= *current)
}
