use std::fmt::Display;
use std::str::FromStr;

use pep440_rs::{Operator, Version, VersionSpecifier};
use tracing::trace;

/// One series of the classification ruler.
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    label: &'static str,
    sample: Version,
}

impl Bucket {
    fn new(label: &'static str, sample: &str) -> Self {
        Self {
            label,
            sample: Version::from_str(sample).expect("bucket samples are valid versions"),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }
}

/// Minimum interpreter series a specifier was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MinVersion {
    /// The first bucket of the table whose sample satisfies the specifier.
    Series(&'static str),
    /// An empty specifier, compatible with everything.
    Any,
    /// No specifier could be determined.
    Unknown,
    /// The specifier does not parse.
    Invalid,
    /// The specifier parses but no sample satisfies it.
    Unsatisfiable,
}

impl MinVersion {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Series(label) => *label,
            Self::Any => "any",
            Self::Unknown => "?",
            Self::Invalid => "X",
            Self::Unsatisfiable => "none?",
        }
    }
}

impl Display for MinVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreter series ordered from least to most restrictive.
///
/// Each sample is the last plausible patch release of its series (`X.Y.99`), so a specifier
/// like `>=3.6.1` still lands in `3.6`. `py3` samples the first alpha of Python 3 and only
/// matches specifiers that explicitly opt into pre-releases.
#[derive(Debug, Clone)]
pub(crate) struct BucketTable {
    buckets: Vec<Bucket>,
}

impl BucketTable {
    pub(crate) fn new(buckets: Vec<Bucket>) -> Self {
        Self { buckets }
    }

    pub(crate) fn standard() -> Self {
        Self::new(vec![
            Bucket::new("py3", "3.0a1"),
            Bucket::new("2.7", "2.7.99"),
            Bucket::new("3.1", "3.1.99"),
            Bucket::new("3.2", "3.2.99"),
            Bucket::new("3.3", "3.3.99"),
            Bucket::new("3.4", "3.4.99"),
            Bucket::new("3.5", "3.5.99"),
            Bucket::new("3.6", "3.6.99"),
            Bucket::new("3.7", "3.7.99"),
            Bucket::new("3.8", "3.8.99"),
            Bucket::new("3.9", "3.9.99"),
            Bucket::new("3.10", "3.10.99"),
            Bucket::new("3.11", "3.11.99"),
            Bucket::new("3.12", "3.12.99"),
            Bucket::new("3.13", "3.13.99"),
            Bucket::new("3.14", "3.14.99"),
            Bucket::new("3.15", "3.15.99"),
        ])
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Sort key for report rows: table order first, then the sentinels.
    pub(crate) fn position(&self, min_version: MinVersion) -> usize {
        let sentinel = |offset| self.buckets.len() + offset;
        match min_version {
            MinVersion::Series(label) => self
                .buckets
                .iter()
                .position(|bucket| bucket.label == label)
                .unwrap_or_else(|| sentinel(4)),
            MinVersion::Any => sentinel(0),
            MinVersion::Unknown => sentinel(1),
            MinVersion::Invalid => sentinel(2),
            MinVersion::Unsatisfiable => sentinel(3),
        }
    }

    /// Classify a `Requires-Python` style specifier into the oldest series it allows.
    pub(crate) fn classify(&self, specifier: Option<&str>) -> MinVersion {
        let Some(specifier) = specifier else {
            return MinVersion::Unknown;
        };
        if specifier.trim().is_empty() {
            return MinVersion::Any;
        }

        let Some(specifiers) = parse_specifiers(specifier) else {
            trace!(specifier, "Invalid specifier");
            return MinVersion::Invalid;
        };

        self.buckets
            .iter()
            .find(|bucket| allows(&specifiers, &bucket.sample))
            .map(|bucket| MinVersion::Series(bucket.label))
            .unwrap_or(MinVersion::Unsatisfiable)
    }
}

/// Split a comma separated specifier set, ignoring empty clauses.
fn parse_specifiers(specifier: &str) -> Option<Vec<VersionSpecifier>> {
    specifier
        .split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| VersionSpecifier::from_str(clause).ok())
        .collect()
}

/// Whether every clause accepts `version`.
///
/// Pre-release versions are only accepted when some clause names a pre-release itself.
fn allows(specifiers: &[VersionSpecifier], version: &Version) -> bool {
    if version.any_prerelease() && !specifiers.iter().any(names_prerelease) {
        return false;
    }
    specifiers
        .iter()
        .all(|specifier| specifier_contains(specifier, version))
}

fn specifier_contains(specifier: &VersionSpecifier, version: &Version) -> bool {
    match specifier.operator() {
        // `<V` with a pre-release `V` admits earlier pre-releases of the same release.
        Operator::LessThan if specifier.version().any_prerelease() => {
            version < specifier.version()
        }
        _ => specifier.contains(version),
    }
}

fn names_prerelease(specifier: &VersionSpecifier) -> bool {
    match specifier.operator() {
        Operator::NotEqual | Operator::NotEqualStar => false,
        _ => specifier.version().any_prerelease(),
    }
}
