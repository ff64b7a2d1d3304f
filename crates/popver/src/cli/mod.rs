use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::{BoolishValueParser, Styles};
use clap::{Args, Parser, ValueEnum};
use popver_consts::env_vars::EnvVars;
use popver_consts::{DEFAULT_CONCURRENCY, PYPI_SIMPLE_URL};

mod inventory;
mod reporter;

pub(crate) use inventory::inventory;

#[derive(Copy, Clone)]
pub(crate) enum ExitStatus {
    /// The command succeeded.
    Success,

    /// The command failed with an unexpected error.
    Error,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => Self::from(0),
            ExitStatus::Error => Self::from(2),
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub(crate) enum ColorChoice {
    /// Enables colored output only when the output is going to a terminal or TTY with support.
    Auto,

    /// Enables colored output regardless of the detected environment.
    Always,

    /// Disables colored output.
    Never,
}

impl From<ColorChoice> for anstream::ColorChoice {
    fn from(value: ColorChoice) -> Self {
        match value {
            ColorChoice::Auto => Self::Auto,
            ColorChoice::Always => Self::Always,
            ColorChoice::Never => Self::Never,
        }
    }
}

/// Which cohort of projects to count when a private index is configured.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum Show {
    /// Only count projects that are not on the private index.
    Public,
    /// Only count projects found on the private index.
    Private,
}

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(
    name = "popver",
    author,
    version = crate::version::version(),
    about = "Inventory the minimum Python version your dependencies support"
)]
#[command(styles=STYLES)]
pub(crate) struct Cli {
    /// Projects to look up. `@FILE` reads one project name per line from `FILE`.
    #[arg(value_name = "PROJECTS")]
    pub(crate) projects: Vec<String>,

    #[command(flatten)]
    pub(crate) index_args: IndexArgs,

    #[command(flatten)]
    pub(crate) globals: GlobalArgs,
}

#[derive(Debug, Args)]
pub(crate) struct IndexArgs {
    /// The simple index to look projects up on.
    ///
    /// Defaults to PyPI. `PIP_INDEX_URL` is honored when `POPVER_INDEX_URL` is unset.
    #[arg(long, env = EnvVars::POPVER_INDEX_URL, value_name = "URL")]
    pub(crate) index_url: Option<String>,

    /// An optional private simple index, consulted before the public one.
    #[arg(long, env = EnvVars::POPVER_PRIVATE_INDEX, value_name = "URL")]
    pub(crate) private_index: Option<String>,

    /// Only count `public` or `private` projects, instead of both.
    #[arg(long, value_enum)]
    pub(crate) show: Option<Show>,

    /// Number of projects to look up concurrently.
    #[arg(
        short,
        long,
        env = EnvVars::POPVER_CONCURRENCY,
        default_value_t = DEFAULT_CONCURRENCY,
        value_name = "JOBS"
    )]
    pub(crate) jobs: NonZeroUsize,
}

impl IndexArgs {
    /// The public index URL, falling back to pip's configuration and then to PyPI.
    pub(crate) fn index_url(&self) -> String {
        self.index_url
            .clone()
            .or_else(|| EnvVars::var(EnvVars::POPVER_INDEX_URL).ok())
            .unwrap_or_else(|| PYPI_SIMPLE_URL.to_string())
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Global options")]
pub(crate) struct GlobalArgs {
    /// Whether to use color in output.
    #[arg(
        long,
        value_enum,
        env = EnvVars::POPVER_COLOR,
        default_value_t = ColorChoice::Auto,
    )]
    pub(crate) color: ColorChoice,

    /// Do not print the lookup progress.
    #[arg(
        long,
        env = EnvVars::POPVER_NO_PROGRESS,
        value_parser = BoolishValueParser::new(),
    )]
    pub(crate) no_progress: bool,

    /// Use quiet output.
    ///
    /// Repeating this option, e.g., `-qq`, will enable a silent mode in which
    /// popver will write no output to stdout.
    #[arg(short, long, conflicts_with = "verbose", action = clap::ArgAction::Count)]
    pub(crate) quiet: u8,

    /// Use verbose output.
    ///
    /// Prints each project as it is classified. Repeat it for debug (`-vv`) and trace
    /// (`-vvv`, `-vvvv`) logging.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Write trace logs to the specified file.
    #[arg(long, value_name = "LOG_FILE")]
    pub(crate) log_file: Option<PathBuf>,
}

/// Expand `@FILE` arguments into the project names listed in the file.
///
/// Leading and trailing whitespace and byte order marks are stripped, blank lines are skipped.
pub(crate) fn expand_projects(items: Vec<String>) -> Result<Vec<String>> {
    let mut projects = Vec::with_capacity(items.len());
    for item in items {
        let Some(path) = item.strip_prefix('@') else {
            projects.push(item);
            continue;
        };

        let contents = fs_err::read_to_string(path)
            .with_context(|| format!("Failed to read project list `{path}`"))?;
        projects.extend(
            contents
                .lines()
                .map(|line| line.replace('\u{feff}', "").trim().to_string())
                .filter(|line| !line.is_empty()),
        );
    }
    Ok(projects)
}
