use std::borrow::Cow;

use bytes::Bytes;
use lazy_regex::{regex, regex_is_match, regex_replace_all};
use popver_consts::{METADATA_SIDECAR_SUFFIX, SIMPLE_INDEX_ACCEPT};
use serde::Deserialize;
use tracing::{instrument, trace};
use url::Url;

use crate::archive::ArchiveExtension;
use crate::transport::{self, Transport};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Project `{0}` was not found on the index")]
    NoSuchProject(String),
    #[error("Invalid project name: `{0}`")]
    InvalidName(String),
    #[error("Invalid index URL: `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error("Failed to parse the project page at `{url}`")]
    Json {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
}

/// The kind of file an artifact is, ordered from least to most preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum PackageType {
    Other,
    Bdist,
    Sdist,
    Wheel,
}

impl PackageType {
    /// How likely this kind of file is to carry usable metadata.
    pub(crate) fn goodness(self) -> u8 {
        match self {
            Self::Wheel => 3,
            Self::Sdist => 2,
            Self::Bdist => 1,
            Self::Other => 0,
        }
    }
}

const BDIST_SUFFIXES: [&str; 4] = [".exe", ".msi", ".rpm", ".dmg"];

/// One file published for a project, as listed by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DistributionArtifact {
    pub(crate) filename: String,
    pub(crate) project: String,
    pub(crate) version: Option<String>,
    pub(crate) package_type: PackageType,
    /// Where to fetch the file, without any digest fragment.
    pub(crate) url: Url,
    pub(crate) is_yanked: bool,
    /// The index serves the core metadata at `url + ".metadata"`.
    pub(crate) has_metadata_sidecar: bool,
    pub(crate) requires_python: Option<String>,
}

impl DistributionArtifact {
    fn new(
        project: &str,
        filename: String,
        mut url: Url,
        is_yanked: bool,
        has_metadata_sidecar: bool,
        requires_python: Option<String>,
    ) -> Self {
        url.set_fragment(None);
        let (package_type, version) = split_filename(project, &filename);
        Self {
            filename,
            project: project.to_string(),
            version,
            package_type,
            url,
            is_yanked,
            has_metadata_sidecar,
            requires_python,
        }
    }

    /// The location of the standalone core metadata file.
    pub(crate) fn metadata_url(&self) -> Url {
        let mut url = self.url.clone();
        let path = format!("{}{METADATA_SIDECAR_SUFFIX}", url.path());
        url.set_path(&path);
        url
    }
}

/// Normalize a project name, so that `Foo.Bar`, `foo_bar` and `foo-bar` compare equal.
pub(crate) fn normalize_name(name: &str) -> String {
    regex_replace_all!(r"[-_.]+", name, "-").to_ascii_lowercase()
}

/// Classify a filename and extract the version it embeds.
fn split_filename(project: &str, filename: &str) -> (PackageType, Option<String>) {
    let lower = filename.to_ascii_lowercase();

    if let Some(stem) = lower.strip_suffix(".whl") {
        let version = filename[..stem.len()].split('-').nth(1).map(str::to_string);
        return (PackageType::Wheel, version);
    }
    if let Some(stem) = lower.strip_suffix(".egg") {
        let version = filename[..stem.len()].split('-').nth(1).map(str::to_string);
        return (PackageType::Bdist, version);
    }
    if let Some((stem, _)) = ArchiveExtension::strip(filename) {
        return (PackageType::Sdist, split_stem(project, stem));
    }
    if let Some(suffix) = BDIST_SUFFIXES.iter().find(|suffix| lower.ends_with(*suffix)) {
        let stem = &filename[..filename.len() - suffix.len()];
        return (PackageType::Bdist, split_stem(project, stem));
    }

    (PackageType::Other, None)
}

/// Split `{name}-{version}` where the name itself may contain dashes.
fn split_stem(project: &str, stem: &str) -> Option<String> {
    let project = normalize_name(project);
    stem.match_indices('-')
        .find(|(index, _)| normalize_name(&stem[..*index]) == project)
        .or_else(|| stem.rmatch_indices('-').next())
        .map(|(index, _)| stem[index + 1..].to_string())
}

/// The files listed on one project page.
#[derive(Debug, Clone)]
pub(crate) struct ProjectPage {
    pub(crate) project: String,
    pub(crate) artifacts: Vec<DistributionArtifact>,
}

impl ProjectPage {
    /// Parse a page served as either JSON or HTML.
    pub(crate) fn parse(project: &str, page_url: &Url, body: &[u8]) -> Result<Self, Error> {
        if body.trim_ascii_start().starts_with(b"{") {
            Self::from_json(project, page_url, body)
        } else {
            Ok(Self::from_html(project, page_url, &String::from_utf8_lossy(body)))
        }
    }

    fn from_json(project: &str, page_url: &Url, body: &[u8]) -> Result<Self, Error> {
        let page: JsonPage = serde_json::from_slice(body).map_err(|source| Error::Json {
            url: page_url.clone(),
            source,
        })?;
        let project = page.name.unwrap_or_else(|| project.to_string());

        let artifacts = page
            .files
            .into_iter()
            .filter_map(|file| {
                let Ok(url) = page_url.join(&file.url) else {
                    trace!(url = %file.url, "Skipping file with an invalid URL");
                    return None;
                };
                let has_metadata_sidecar = file
                    .core_metadata
                    .or(file.dist_info_metadata)
                    .is_some_and(|flag| flag.is_set());
                Some(DistributionArtifact::new(
                    &project,
                    file.filename,
                    url,
                    file.yanked.is_set(),
                    has_metadata_sidecar,
                    file.requires_python,
                ))
            })
            .collect();

        Ok(Self { project, artifacts })
    }

    fn from_html(project: &str, page_url: &Url, body: &str) -> Self {
        // Quoted attribute values may hold a bare `>`.
        let anchor = regex!(r#"(?is)<a\s((?:[^>"']|"[^"]*"|'[^']*')*)>(.*?)</a\s*>"#);

        let artifacts = anchor
            .captures_iter(body)
            .filter_map(|captures| {
                let attributes = parse_attributes(&captures[1]);
                let attribute = |name: &str| {
                    attributes
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(name))
                        .map(|(_, value)| value.as_str())
                };

                let url = page_url.join(attribute("href")?).ok()?;
                let text = unescape(captures[2].trim());
                let filename = if text.is_empty() {
                    url.path_segments()?.next_back()?.to_string()
                } else {
                    text.into_owned()
                };
                let has_metadata_sidecar = attribute("data-core-metadata")
                    .or_else(|| attribute("data-dist-info-metadata"))
                    .is_some_and(|value| value != "false");

                Some(DistributionArtifact::new(
                    project,
                    filename,
                    url,
                    attribute("data-yanked").is_some(),
                    has_metadata_sidecar,
                    attribute("data-requires-python").map(str::to_string),
                ))
            })
            .collect();

        Self {
            project: project.to_string(),
            artifacts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonPage {
    name: Option<String>,
    files: Vec<JsonFile>,
}

#[derive(Debug, Deserialize)]
struct JsonFile {
    filename: String,
    url: String,
    #[serde(rename = "requires-python")]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: Flag,
    #[serde(rename = "core-metadata")]
    core_metadata: Option<Flag>,
    #[serde(rename = "dist-info-metadata")]
    dist_info_metadata: Option<Flag>,
}

/// A field that is either a boolean or a value implying `true` (a reason, a hash map).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Value(serde_json::Value),
}

impl Default for Flag {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Value(value) => !value.is_null(),
        }
    }
}

/// Parse the attributes of an HTML start tag, unescaping their values.
fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    regex!(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .captures_iter(tag)
        .map(|captures| {
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .or_else(|| captures.get(4))
                .map(|value| unescape(value.as_str()).into_owned())
                .unwrap_or_default();
            (captures[1].to_string(), value)
        })
        .collect()
}

/// Replace character references, keeping text with an unknown entity as is.
fn unescape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape(text).unwrap_or(Cow::Borrowed(text))
}

/// A client for a PEP 503 / PEP 691 simple repository.
#[derive(Debug)]
pub(crate) struct IndexClient<'a, T> {
    transport: &'a T,
    base_url: Url,
}

impl<'a, T: Transport> IndexClient<'a, T> {
    pub(crate) fn new(transport: &'a T, base_url: &str) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url).map_err(|source| Error::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            transport,
            base_url,
        })
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn project_url(&self, project: &str) -> Result<Url, Error> {
        if !regex_is_match!(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$", project) {
            return Err(Error::InvalidName(project.to_string()));
        }
        let path = format!("{}/", normalize_name(project));
        self.base_url
            .join(&path)
            .map_err(|source| Error::InvalidUrl { url: path, source })
    }

    /// Fetch the list of files published for `project`.
    #[instrument(level = "debug", skip(self), fields(index = %self.base_url))]
    pub(crate) async fn get_project_page(&self, project: &str) -> Result<ProjectPage, Error> {
        let url = self.project_url(project)?;
        let body: Bytes = match self.transport.get(&url, Some(SIMPLE_INDEX_ACCEPT)).await {
            Ok(body) => body,
            Err(transport::Error::NotFound(_)) => {
                return Err(Error::NoSuchProject(project.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let page = ProjectPage::parse(project, &url, &body)?;
        trace!(files = page.artifacts.len(), "Parsed project page");
        Ok(page)
    }
}
