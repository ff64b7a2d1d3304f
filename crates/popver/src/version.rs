/// The version of popver, as reported by `--version` and in the user agent.
pub(crate) fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
