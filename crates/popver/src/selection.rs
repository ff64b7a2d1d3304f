use std::cmp::Ordering;
use std::str::FromStr;

use pep440_rs::Version;
use tracing::trace;

use crate::index::{DistributionArtifact, PackageType};

/// Sort key used to rank the artifacts of one project.
///
/// Compares, in order: final releases over pre-releases, the version, the kind of file,
/// zip sdists over tarballs, then the filename and url. Any remaining fields of the
/// artifact break exact ties so the winner never depends on input order.
#[derive(Debug)]
struct SelectionKey<'a> {
    not_prerelease: bool,
    version: Version,
    goodness: u8,
    is_zip_sdist: bool,
    artifact: &'a DistributionArtifact,
}

impl<'a> SelectionKey<'a> {
    fn new(artifact: &'a DistributionArtifact) -> Option<Self> {
        let version = Version::from_str(artifact.version.as_deref()?).ok()?;
        Some(Self {
            not_prerelease: !version.any_prerelease(),
            version,
            goodness: artifact.package_type.goodness(),
            is_zip_sdist: artifact.package_type == PackageType::Sdist
                && artifact.filename.ends_with(".zip"),
            artifact,
        })
    }
}

impl Ord for SelectionKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.artifact, other.artifact);
        self.not_prerelease
            .cmp(&other.not_prerelease)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.goodness.cmp(&other.goodness))
            .then_with(|| self.is_zip_sdist.cmp(&other.is_zip_sdist))
            .then_with(|| a.filename.cmp(&b.filename))
            .then_with(|| a.url.cmp(&b.url))
            .then_with(|| a.project.cmp(&b.project))
            .then_with(|| a.has_metadata_sidecar.cmp(&b.has_metadata_sidecar))
            .then_with(|| a.requires_python.cmp(&b.requires_python))
    }
}

impl PartialOrd for SelectionKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SelectionKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SelectionKey<'_> {}

/// Pick the artifact an installer would most likely pick, which is also the one most likely
/// to carry metadata.
///
/// Yanked artifacts and artifacts without a parseable version are ignored.
pub(crate) fn select(candidates: &[DistributionArtifact]) -> Option<&DistributionArtifact> {
    candidates
        .iter()
        .filter(|artifact| !artifact.is_yanked)
        .filter_map(|artifact| {
            let key = SelectionKey::new(artifact);
            if key.is_none() {
                trace!(
                    filename = %artifact.filename,
                    "Ignoring artifact without a valid version"
                );
            }
            key
        })
        .max()
        .map(|key| key.artifact)
}
