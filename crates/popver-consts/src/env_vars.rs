use std::ffi::OsString;

use tracing::info;

pub struct EnvVars;

impl EnvVars {
    // POPVER specific environment variables, public for users
    pub const POPVER_INDEX_URL: &'static str = "POPVER_INDEX_URL";
    pub const POPVER_PRIVATE_INDEX: &'static str = "POPVER_PRIVATE_INDEX";
    pub const POPVER_CONCURRENCY: &'static str = "POPVER_CONCURRENCY";
    pub const POPVER_COLOR: &'static str = "POPVER_COLOR";
    pub const POPVER_NO_PROGRESS: &'static str = "POPVER_NO_PROGRESS";
    pub const POPVER_NATIVE_TLS: &'static str = "POPVER_NATIVE_TLS";
    pub const SSL_CERT_FILE: &'static str = "SSL_CERT_FILE";
}

impl EnvVars {
    // pip environment variables that we honor when ours are unset
    const PIP_INDEX_URL: &'static str = "PIP_INDEX_URL";
}

impl EnvVars {
    /// Read an environment variable, falling back to the corresponding pip variable if not found.
    pub fn var_os(name: &str) -> Option<OsString> {
        #[allow(clippy::disallowed_methods)]
        std::env::var_os(name).or_else(|| {
            let name = Self::pip_name(name)?;
            let val = std::env::var_os(name)?;
            info!("Falling back to pip environment variable for {name}");
            Some(val)
        })
    }

    /// Read an environment variable, falling back to the corresponding pip variable if not found.
    pub fn var(name: &str) -> Result<String, std::env::VarError> {
        match Self::var_os(name) {
            Some(s) => s.into_string().map_err(std::env::VarError::NotUnicode),
            None => Err(std::env::VarError::NotPresent),
        }
    }

    /// Read an environment var and parse as bool.
    pub fn var_as_bool(name: &str) -> Option<bool> {
        if let Some(val) = EnvVars::var_os(name)
            && let Some(val) = val.to_str()
            && let Some(val) = EnvVars::parse_boolish(val)
        {
            Some(val)
        } else {
            None
        }
    }

    /// Parse a boolean from a string.
    ///
    /// Adapted from Clap's `BoolishValueParser` which is dual licensed under the MIT and Apache-2.0.
    /// See `clap_builder/src/util/str_to_bool.rs`
    fn parse_boolish(val: &str) -> Option<bool> {
        // True values are `y`, `yes`, `t`, `true`, `on`, and `1`.
        const TRUE_LITERALS: [&str; 6] = ["y", "yes", "t", "true", "on", "1"];

        // False values are `n`, `no`, `f`, `false`, `off`, and `0`.
        const FALSE_LITERALS: [&str; 6] = ["n", "no", "f", "false", "off", "0"];

        let val = val.to_lowercase();
        let pat = val.as_str();
        if TRUE_LITERALS.contains(&pat) {
            Some(true)
        } else if FALSE_LITERALS.contains(&pat) {
            Some(false)
        } else {
            None
        }
    }

    fn pip_name(name: &str) -> Option<&str> {
        match name {
            Self::POPVER_INDEX_URL => Some(Self::PIP_INDEX_URL),
            _ => None,
        }
    }
}
