#![allow(dead_code, unreachable_pub)]

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::fixture::{ChildPath, FileWriteStr, PathChild, PathCreateDir};
use popver_consts::env_vars::EnvVars;

/// A temporary directory holding `file://` simple indexes and the files they link to.
pub struct TestContext {
    temp_dir: ChildPath,
    /// Standard filters for this test context.
    filters: Vec<(String, String)>,
    #[allow(dead_code)]
    _root: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let root = tempfile::TempDir::with_prefix("popver-test")
            .expect("Failed to create test root directory");
        let temp_dir = ChildPath::new(
            root.path()
                .canonicalize()
                .expect("Failed to canonicalize test root"),
        );

        let filters = vec![(
            regex::escape(&temp_dir.path().display().to_string()),
            "[TEMP]".to_string(),
        )];

        Self {
            temp_dir,
            filters,
            _root: root,
        }
    }

    pub fn temp_dir(&self) -> &ChildPath {
        &self.temp_dir
    }

    /// The `file://` URL of a directory below the test root.
    pub fn url(&self, path: &str) -> String {
        url::Url::from_directory_path(self.temp_dir.child(path).path())
            .expect("Test paths are absolute")
            .to_string()
    }

    /// Write a project page of the index rooted at `index`.
    pub fn project_page(&self, index: &str, project: &str, page: &str) -> anyhow::Result<()> {
        let dir = self.temp_dir.child(index).child(project);
        dir.create_dir_all()?;
        dir.child("index.html").write_str(page)?;
        Ok(())
    }

    /// Write a file that project pages link to as `../../files/{name}`.
    pub fn file(&self, name: &str, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let dir = self.temp_dir.child("files");
        dir.create_dir_all()?;
        let path = dir.child(name).to_path_buf();
        fs_err::write(&path, contents)?;
        Ok(path)
    }

    /// Write a wheel holding only `{name}-{version}.dist-info/METADATA`.
    pub fn wheel(&self, filename: &str, metadata: &str) -> anyhow::Result<PathBuf> {
        let mut segments = filename.split('-');
        let name = segments.next().unwrap_or_default();
        let version = segments.next().unwrap_or_default();

        let data = stored_zip(
            &format!("{name}-{version}.dist-info/METADATA"),
            metadata.as_bytes(),
        )?;
        self.file(filename, &data)
    }

    /// Standard snapshot filters.
    pub fn filters(&self) -> Vec<(&str, &str)> {
        self.filters
            .iter()
            .map(|(p, r)| (p.as_str(), r.as_str()))
            .collect()
    }

    /// A `popver` command isolated from the user's environment.
    pub fn command(&self) -> Command {
        let mut command = Command::new(get_bin());
        command
            .current_dir(self.temp_dir.path())
            .arg("--no-progress")
            .env_remove(EnvVars::POPVER_INDEX_URL)
            .env_remove(EnvVars::POPVER_PRIVATE_INDEX)
            .env_remove(EnvVars::POPVER_CONCURRENCY)
            .env_remove(EnvVars::POPVER_COLOR)
            .env_remove("PIP_INDEX_URL")
            .env_remove("RUST_LOG");
        command
    }

    /// A `popver` command against the public index at `simple/`.
    pub fn inventory(&self) -> Command {
        let mut command = self.command();
        command.arg("--index-url").arg(self.url("simple"));
        command
    }

    pub fn read(&self, file: impl AsRef<Path>) -> String {
        fs_err::read_to_string(self.temp_dir.join(file)).unwrap_or_default()
    }
}

/// Returns the popver binary that cargo built before launching the tests.
pub fn get_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_popver"))
}

fn put_u16(buf: &mut Vec<u8>, fields: &[u16]) {
    for field in fields {
        buf.extend_from_slice(&field.to_le_bytes());
    }
}

fn put_u32(buf: &mut Vec<u8>, fields: &[u32]) {
    for field in fields {
        buf.extend_from_slice(&field.to_le_bytes());
    }
}

/// A zip archive with a single uncompressed entry.
fn stored_zip(name: &str, contents: &[u8]) -> anyhow::Result<Vec<u8>> {
    let size = u32::try_from(contents.len())?;
    let name_len = u16::try_from(name.len())?;
    let crc = crc32fast::hash(contents);

    // Local file header: version 2.0, no flags, stored, zero timestamp.
    let mut data = Vec::new();
    put_u32(&mut data, &[0x0403_4b50]);
    put_u16(&mut data, &[20, 0, 0, 0, 0]);
    put_u32(&mut data, &[crc, size, size]);
    put_u16(&mut data, &[name_len, 0]);
    data.extend_from_slice(name.as_bytes());
    data.extend_from_slice(contents);

    let central_offset = u32::try_from(data.len())?;
    put_u32(&mut data, &[0x0201_4b50]);
    put_u16(&mut data, &[20, 20, 0, 0, 0, 0]);
    put_u32(&mut data, &[crc, size, size]);
    put_u16(&mut data, &[name_len, 0, 0, 0, 0]);
    put_u32(&mut data, &[0, 0]);
    data.extend_from_slice(name.as_bytes());
    let central_size = u32::try_from(data.len())? - central_offset;

    put_u32(&mut data, &[0x0605_4b50]);
    put_u16(&mut data, &[0, 0, 1, 1]);
    put_u32(&mut data, &[central_size, central_offset]);
    put_u16(&mut data, &[0]);

    Ok(data)
}

/// A JSON (PEP 691) project page listing one file.
pub fn json_page(project: &str, filename: &str, requires_python: Option<&str>) -> String {
    let requires_python = requires_python
        .map(|value| format!(r#", "requires-python": "{value}""#))
        .unwrap_or_default();
    format!(
        r#"{{"meta": {{"api-version": "1.1"}}, "name": "{project}", "files": [{{"filename": "{filename}", "url": "../../files/{filename}", "hashes": {{}}{requires_python}}}]}}"#
    )
}

/// An HTML (PEP 503) project page listing one file.
pub fn html_page(filename: &str, attributes: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n  <body>\n    <a href=\"../../files/{filename}#sha256=0\" {attributes}>{filename}</a><br/>\n  </body>\n</html>\n"
    )
}

#[allow(unused_macros)]
macro_rules! cmd_snapshot {
    ($spawnable:expr, @$snapshot:literal) => {{
        cmd_snapshot!(Vec::<(&str, &str)>::new(), $spawnable, @$snapshot)
    }};
    ($filters:expr, $spawnable:expr, @$snapshot:literal) => {{
        let mut settings = insta::Settings::clone_current();
        for (matcher, replacement) in $filters {
            settings.add_filter(matcher, replacement);
        }
        let _guard = settings.bind_to_scope();
        insta_cmd::assert_cmd_snapshot!($spawnable, @$snapshot);
    }};
}

#[allow(unused_imports)]
pub(crate) use cmd_snapshot;
