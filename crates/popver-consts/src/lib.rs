use std::num::NonZeroUsize;

pub mod env_vars;

/// The public index queried when no `--index-url` is given.
pub const PYPI_SIMPLE_URL: &str = "https://pypi.org/simple/";

/// Number of projects looked up concurrently by default.
pub const DEFAULT_CONCURRENCY: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// Suffix of the standalone core metadata file published next to an artifact (PEP 658).
pub const METADATA_SIDECAR_SUFFIX: &str = ".metadata";

/// Media types accepted from a simple index, most preferred first (PEP 691).
pub const SIMPLE_INDEX_ACCEPT: &str = "application/vnd.pypi.simple.v1+json, application/vnd.pypi.simple.v1+html;q=0.2, text/html;q=0.01";
