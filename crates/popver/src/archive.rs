use std::fmt::Display;

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use async_zip::base::read::seek::ZipFileReader;
use futures::StreamExt;
use futures::io::{AsyncBufRead, AsyncSeek};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] async_zip::error::ZipError),
    #[error("Unsupported archive type: `{0}`")]
    UnsupportedArchive(String),
}

/// Archive formats a distribution may be published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArchiveExtension {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveExtension {
    const SUFFIXES: [(&'static str, Self); 8] = [
        (".zip", Self::Zip),
        (".tar", Self::Tar),
        (".tar.gz", Self::TarGz),
        (".tgz", Self::TarGz),
        (".tar.bz2", Self::TarBz2),
        (".tbz", Self::TarBz2),
        (".tar.xz", Self::TarXz),
        (".txz", Self::TarXz),
    ];

    pub(crate) fn from_path(path: &str) -> Result<Self, Error> {
        Self::strip(path)
            .map(|(_, ext)| ext)
            .ok_or_else(|| Error::UnsupportedArchive(path.to_string()))
    }

    /// Split a filename into its stem and archive extension.
    ///
    /// Matching is case-insensitive, the stem keeps its original case.
    pub(crate) fn strip(path: &str) -> Option<(&str, Self)> {
        let lower = path.to_ascii_lowercase();
        Self::SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.ends_with(suffix))
            .map(|(suffix, ext)| (&path[..path.len() - suffix.len()], *ext))
    }

    pub(crate) fn is_zip(self) -> bool {
        matches!(self, Self::Zip)
    }
}

impl Display for ArchiveExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zip => write!(f, "zip"),
            Self::Tar => write!(f, "tar"),
            Self::TarGz => write!(f, "tar.gz"),
            Self::TarBz2 => write!(f, "tar.bz2"),
            Self::TarXz => write!(f, "tar.xz"),
        }
    }
}

/// Read a single entry from a seekable zip archive.
///
/// Only the central directory and the selected entry are read, so a reader backed by range
/// requests never transfers the rest of the archive. `select` receives every entry name
/// (names that are not valid UTF-8 are passed as empty strings) and returns the index to
/// read, or `None` to read nothing.
pub(crate) async fn read_zip_entry<R>(
    reader: R,
    select: impl FnOnce(&[&str]) -> Option<usize>,
) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncBufRead + AsyncSeek + Unpin,
{
    let mut zip = ZipFileReader::new(reader).await?;

    let index = {
        let names: Vec<&str> = zip
            .file()
            .entries()
            .iter()
            .map(|entry| entry.filename().as_str().unwrap_or_default())
            .collect();
        trace!(entries = names.len(), "Read zip central directory");
        select(&names)
    };
    let Some(index) = index else {
        return Ok(None);
    };

    let mut entry = zip.reader_with_entry(index).await?;
    let mut contents = Vec::new();
    entry.read_to_end_checked(&mut contents).await?;

    Ok(Some(contents))
}

/// Read every entry of an in-memory tarball whose name is `wanted`.
///
/// Tarballs have no index, so the whole stream is decompressed and walked once.
pub(crate) async fn read_tar_entries(
    data: &[u8],
    ext: ArchiveExtension,
    wanted: impl Fn(&str) -> bool,
) -> Result<Vec<(String, Vec<u8>)>, Error> {
    match ext {
        ArchiveExtension::Tar => collect_tar_entries(data, wanted).await,
        ArchiveExtension::TarGz => collect_tar_entries(GzipDecoder::new(data), wanted).await,
        ArchiveExtension::TarBz2 => collect_tar_entries(BzDecoder::new(data), wanted).await,
        ArchiveExtension::TarXz => collect_tar_entries(XzDecoder::new(data), wanted).await,
        ArchiveExtension::Zip => Err(Error::UnsupportedArchive(ext.to_string())),
    }
}

async fn collect_tar_entries<R>(
    reader: R,
    wanted: impl Fn(&str) -> bool,
) -> Result<Vec<(String, Vec<u8>)>, Error>
where
    R: AsyncRead + Unpin + Send,
{
    let mut archive = tokio_tar::Archive::new(reader);
    let mut entries = archive.entries()?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if !wanted(&name) {
            continue;
        }

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).await?;
        found.push((name, contents));
    }

    Ok(found)
}
