use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::archive::{self, ArchiveExtension};
use crate::index::{DistributionArtifact, PackageType};
use crate::range_reader::RangeReader;
use crate::transport::{self, Transport};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Cannot read metadata from {kind} `{filename}`")]
    UnsupportedArtifactKind { filename: String, kind: PackageType },
    #[error("Failed to read archive `{filename}`")]
    ArchiveRead {
        filename: String,
        #[source]
        source: archive::Error,
    },
    #[error("No metadata file found in `{0}`")]
    MetadataEntryNotFound(String),
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

impl Error {
    fn archive(artifact: &DistributionArtifact) -> impl FnOnce(archive::Error) -> Self + '_ {
        move |source| Self::ArchiveRead {
            filename: artifact.filename.clone(),
            source,
        }
    }
}

const PY_VERSION_CLASSIFIER_PREFIX: &str = "Programming Language :: Python :: ";

/// Fetch the core metadata document of an artifact as cheaply as possible.
///
/// A published sidecar is preferred. Wheels and zip sdists are read through range requests,
/// fetching only the central directory and the one entry needed. Tarballs have no index and
/// are downloaded whole.
#[instrument(level = "debug", skip_all, fields(filename = %artifact.filename))]
pub(crate) async fn fetch_metadata_bytes<T: Transport>(
    transport: &T,
    artifact: &DistributionArtifact,
) -> Result<Bytes, Error> {
    if artifact.has_metadata_sidecar {
        trace!("Fetching metadata sidecar");
        return Ok(transport.get(&artifact.metadata_url(), None).await?);
    }

    match artifact.package_type {
        PackageType::Wheel => {
            let Some(path) = wheel_metadata_path(&artifact.filename) else {
                return Err(Error::MetadataEntryNotFound(artifact.filename.clone()));
            };
            read_remote_zip_entry(transport, artifact, |names| {
                names.iter().position(|name| *name == path)
            })
            .await
        }
        PackageType::Sdist => {
            let ext =
                ArchiveExtension::from_path(&artifact.filename).map_err(Error::archive(artifact))?;
            if ext.is_zip() {
                read_remote_zip_entry(transport, artifact, |names| {
                    best_pkg_info(names.iter().copied()).and_then(|best| {
                        names.iter().position(|name| *name == best)
                    })
                })
                .await
            } else {
                trace!(%ext, "Downloading sdist");
                let data = transport.get(&artifact.url, None).await?;
                let entries = archive::read_tar_entries(&data, ext, is_pkg_info)
                    .await
                    .map_err(Error::archive(artifact))?;
                let best = best_pkg_info(entries.iter().map(|(name, _)| name.as_str()))
                    .map(str::to_string);
                entries
                    .into_iter()
                    .find(|(name, _)| Some(name) == best.as_ref())
                    .map(|(_, contents)| Bytes::from(contents))
                    .ok_or_else(|| Error::MetadataEntryNotFound(artifact.filename.clone()))
            }
        }
        kind @ (PackageType::Bdist | PackageType::Other) => Err(Error::UnsupportedArtifactKind {
            filename: artifact.filename.clone(),
            kind,
        }),
    }
}

async fn read_remote_zip_entry<T: Transport>(
    transport: &T,
    artifact: &DistributionArtifact,
    select: impl FnOnce(&[&str]) -> Option<usize>,
) -> Result<Bytes, Error> {
    let reader = RangeReader::new(transport, &artifact.url).await?;
    trace!(len = reader.len(), "Reading zip through range requests");
    archive::read_zip_entry(reader.buffered(), select)
        .await
        .map_err(Error::archive(artifact))?
        .map(Bytes::from)
        .ok_or_else(|| Error::MetadataEntryNotFound(artifact.filename.clone()))
}

/// `{name}-{version}.dist-info/METADATA`, from the first two segments of a wheel filename.
fn wheel_metadata_path(filename: &str) -> Option<String> {
    let mut segments = filename.split('-');
    let name = segments.next()?;
    let version = segments.next()?;
    Some(format!("{name}-{version}.dist-info/METADATA"))
}

/// A `PKG-INFO` directly inside the top level directory of an sdist.
fn is_pkg_info(name: &str) -> bool {
    name.ends_with("/PKG-INFO") && name.matches('/').count() == 1
}

fn best_pkg_info<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    names
        .filter(|name| is_pkg_info(name))
        .min_by_key(|name| (name.matches('/').count(), name.len()))
}

/// The header section of a core metadata document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Parse RFC 822 style headers, stopping at the first empty line.
    pub(crate) fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = fields.last_mut() {
                    let continuation = line.trim();
                    if value.is_empty() {
                        value.push_str(continuation);
                    } else {
                        value.push(' ');
                        value.push_str(continuation);
                    }
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                trace!(line, "Ignoring malformed header line");
                continue;
            };
            fields.push((name.trim().to_string(), value.trim().to_string()));
        }

        Self { fields }
    }

    /// The first value of the header `name`.
    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value of the header `name`, in document order.
    pub(crate) fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Where an inferred specifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Source {
    /// `requires-python` served by the index.
    Index,
    /// `Requires-Python` in the metadata document.
    Metadata,
    /// The oldest versioned `Programming Language :: Python` classifier.
    Classifier,
    /// A `py2.py3` wheel tag.
    #[strum(serialize = "filename tag")]
    FilenameTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Inferred {
    pub(crate) specifier: String,
    pub(crate) source: Source,
}

impl Inferred {
    fn new(specifier: impl Into<String>, source: Source) -> Self {
        Self {
            specifier: specifier.into(),
            source,
        }
    }
}

/// Derive a `Requires-Python` specifier for an artifact, or `None` when nothing hints at one.
///
/// The index field wins over the metadata header, which wins over classifiers, which win over
/// the `py2.py3` filename tag. Metadata is only fetched when the index did not declare one.
#[instrument(level = "debug", skip_all, fields(filename = %artifact.filename))]
pub(crate) async fn infer_requires_python<T: Transport>(
    transport: &T,
    artifact: &DistributionArtifact,
) -> Result<Option<Inferred>, Error> {
    if let Some(requires_python) = &artifact.requires_python {
        return Ok(Some(Inferred::new(requires_python, Source::Index)));
    }

    let headers = Headers::parse(&fetch_metadata_bytes(transport, artifact).await?);
    let inferred = infer_from_headers(&headers).or_else(|| infer_from_filename(&artifact.filename));
    match &inferred {
        Some(inferred) => {
            debug!(specifier = %inferred.specifier, source = %inferred.source, "Inferred");
        }
        None => debug!("No version information"),
    }

    Ok(inferred)
}

fn infer_from_headers(headers: &Headers) -> Option<Inferred> {
    if let Some(requires_python) = headers.get("Requires-Python") {
        return Some(Inferred::new(requires_python, Source::Metadata));
    }

    // Classifiers are listed oldest first by convention.
    headers
        .get_all("Classifier")
        .filter(|classifier| classifier.contains('.'))
        .find_map(|classifier| classifier.strip_prefix(PY_VERSION_CLASSIFIER_PREFIX))
        .map(|version| Inferred::new(format!(">={version}"), Source::Classifier))
}

fn infer_from_filename(filename: &str) -> Option<Inferred> {
    // Only the universal tag says anything about the oldest supported version.
    filename
        .contains("-py2.py3-")
        .then(|| Inferred::new(">=2.7", Source::FilenameTag))
}
