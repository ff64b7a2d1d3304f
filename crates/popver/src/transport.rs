use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use owo_colors::OwoColorize;
use popver_consts::env_vars::EnvVars;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, RANGE};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, trace};
use url::Url;

use crate::warn_user_once;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("`{0}` was not found")]
    NotFound(Url),
    #[error("Request to `{url}` failed")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("`{0}` did not report a content length")]
    MissingContentLength(Url),
    #[error("`{url}` does not support range requests (status {status})")]
    RangeNotSupported { url: Url, status: StatusCode },
    #[error("Unsupported URL: `{0}`")]
    UnsupportedUrl(Url),
}

impl Error {
    fn request(url: &Url) -> impl FnOnce(reqwest::Error) -> Self + '_ {
        move |source| Self::Request {
            url: url.clone(),
            source,
        }
    }
}

/// Fetches bytes from the locations an index points at.
pub(crate) trait Transport {
    /// Fetch a whole document, optionally negotiating its media type.
    async fn get(&self, url: &Url, accept: Option<&str>) -> Result<Bytes, Error>;

    /// The total size of the document, without fetching it.
    async fn content_length(&self, url: &Url) -> Result<u64, Error>;

    /// Fetch the bytes in `range` (end exclusive).
    async fn get_range(&self, url: &Url, range: Range<u64>) -> Result<Bytes, Error>;
}

/// A [`Transport`] over `http(s)://` and `file://` URLs.
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: create_reqwest_client(use_native_tls()),
        }
    }
}

impl HttpTransport {
    fn file_path(url: &Url) -> Result<PathBuf, Error> {
        url.to_file_path()
            .map_err(|()| Error::UnsupportedUrl(url.clone()))
    }

    fn check_scheme(url: &Url) -> Result<(), Error> {
        match url.scheme() {
            "http" | "https" => Ok(()),
            _ => Err(Error::UnsupportedUrl(url.clone())),
        }
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &Url, accept: Option<&str>) -> Result<Bytes, Error> {
        if url.scheme() == "file" {
            let mut path = Self::file_path(url)?;
            if path.is_dir() {
                path.push("index.html");
            }
            return read_file(url, &path).await;
        }
        Self::check_scheme(url)?;

        trace!(%url, "GET");
        let mut request = self.client.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send().await.map_err(Error::request(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.clone()));
        }

        response
            .error_for_status()
            .map_err(Error::request(url))?
            .bytes()
            .await
            .map_err(Error::request(url))
    }

    async fn content_length(&self, url: &Url) -> Result<u64, Error> {
        if url.scheme() == "file" {
            let path = Self::file_path(url)?;
            return match fs_err::tokio::metadata(&path).await {
                Ok(metadata) => Ok(metadata.len()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(url.clone()))
                }
                Err(err) => Err(err.into()),
            };
        }
        Self::check_scheme(url)?;

        trace!(%url, "HEAD");
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(Error::request(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.clone()));
        }
        let response = response.error_for_status().map_err(Error::request(url))?;

        // `Response::content_length` reports the body of a HEAD response, which is empty.
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| Error::MissingContentLength(url.clone()))
    }

    async fn get_range(&self, url: &Url, range: Range<u64>) -> Result<Bytes, Error> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        if url.scheme() == "file" {
            let path = Self::file_path(url)?;
            let mut file = fs_err::tokio::File::open(&path).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut contents = Vec::new();
            file.take(range.end - range.start)
                .read_to_end(&mut contents)
                .await?;
            return Ok(Bytes::from(contents));
        }
        Self::check_scheme(url)?;

        trace!(%url, start = range.start, end = range.end, "GET range");
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(Error::request(url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.clone()));
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::RangeNotSupported {
                url: url.clone(),
                status,
            });
        }

        response.bytes().await.map_err(Error::request(url))
    }
}

async fn read_file(url: &Url, path: &Path) -> Result<Bytes, Error> {
    match fs_err::tokio::read(path).await {
        Ok(contents) => Ok(Bytes::from(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(url.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

fn create_reqwest_client(native_tls: bool) -> reqwest::Client {
    let builder = reqwest::ClientBuilder::new()
        .user_agent(format!("popver/{}", crate::version::version()))
        .tls_built_in_root_certs(false);
    let builder = if native_tls {
        debug!("Using native TLS for reqwest client");
        builder.tls_built_in_native_certs(true)
    } else {
        builder.tls_built_in_webpki_certs(true)
    };
    builder.build().unwrap_or_else(|e| {
        error!(
            "Unable to create reqwest client, falling back to default {:?}",
            e
        );
        reqwest::Client::new()
    })
}

fn use_native_tls() -> bool {
    if let Some(val) = EnvVars::var_as_bool(EnvVars::POPVER_NATIVE_TLS) {
        return val;
    }

    // SSL_CERT_FILE is only respected when using native TLS
    EnvVars::var_os(EnvVars::SSL_CERT_FILE).is_some_and(|path| {
        let path_exists = Path::new(&path).exists();
        if !path_exists {
            warn_user_once!(
                "Ignoring invalid `SSL_CERT_FILE`. File does not exist: {}.",
                Path::new(&path).display().cyan()
            );
        }
        path_exists
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;

    use rustc_hash::FxHashMap;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Request {
        Get(String),
        ContentLength(String),
        Range(String, Range<u64>),
    }

    /// Serves documents from memory and records every request made.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryTransport {
        documents: RefCell<FxHashMap<String, Bytes>>,
        requests: RefCell<Vec<Request>>,
    }

    impl MemoryTransport {
        pub(crate) fn insert(&self, url: &str, body: impl Into<Bytes>) {
            self.documents
                .borrow_mut()
                .insert(url.to_string(), body.into());
        }

        pub(crate) fn requests(&self) -> Vec<Request> {
            self.requests.borrow().clone()
        }

        fn document(&self, url: &Url) -> Result<Bytes, Error> {
            self.documents
                .borrow()
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::NotFound(url.clone()))
        }
    }

    impl Transport for MemoryTransport {
        async fn get(&self, url: &Url, _accept: Option<&str>) -> Result<Bytes, Error> {
            self.requests
                .borrow_mut()
                .push(Request::Get(url.to_string()));
            self.document(url)
        }

        async fn content_length(&self, url: &Url) -> Result<u64, Error> {
            self.requests
                .borrow_mut()
                .push(Request::ContentLength(url.to_string()));
            Ok(self.document(url)?.len() as u64)
        }

        async fn get_range(&self, url: &Url, range: Range<u64>) -> Result<Bytes, Error> {
            self.requests
                .borrow_mut()
                .push(Request::Range(url.to_string(), range.clone()));
            let document = self.document(url)?;
            let end = usize::try_from(range.end)
                .unwrap_or(usize::MAX)
                .min(document.len());
            let start = usize::try_from(range.start).unwrap_or(end).min(end);
            Ok(document.slice(start..end))
        }
    }

    #[tokio::test]
    async fn file_urls_are_served_from_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs_err::create_dir(dir.path().join("foo"))?;
        fs_err::write(dir.path().join("foo").join("index.html"), "<html></html>")?;
        fs_err::write(dir.path().join("foo-1.0.tar.gz"), b"0123456789")?;

        let transport = HttpTransport::default();
        let base = Url::from_directory_path(dir.path()).unwrap();

        let page = transport.get(&base.join("foo/")?, None).await?;
        assert_eq!(page.as_ref(), b"<html></html>");

        let file = base.join("foo-1.0.tar.gz")?;
        assert_eq!(transport.content_length(&file).await?, 10);
        assert_eq!(transport.get_range(&file, 2..5).await?.as_ref(), b"234");
        assert_eq!(transport.get_range(&file, 8..20).await?.as_ref(), b"89");
        assert!(transport.get_range(&file, 3..3).await?.is_empty());

        let missing = transport.get(&base.join("bar/")?, None).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn unsupported_scheme() -> anyhow::Result<()> {
        let transport = HttpTransport::default();
        let url = Url::parse("ftp://example.com/simple/")?;
        let result = transport.get(&url, None).await;
        assert!(matches!(result, Err(Error::UnsupportedUrl(_))));
        Ok(())
    }
}
