use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};

use anstream::{ColorChoice, StripStream, eprintln};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use owo_colors::OwoColorize;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::cli::{Cli, ExitStatus};
use crate::printer::Printer;

mod archive;
mod cli;
mod index;
mod metadata;
mod printer;
mod range_reader;
mod report;
mod selection;
mod transport;
mod version;
mod version_compat;
mod warnings;

pub(crate) static USE_COLOR: LazyLock<bool> =
    LazyLock::new(|| match anstream::Stderr::choice(&std::io::stderr()) {
        ColorChoice::Always | ColorChoice::AlwaysAnsi => true,
        ColorChoice::Never => false,
        // We just asked anstream for a choice, that can't be auto
        ColorChoice::Auto => unreachable!(),
    });

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    /// Suppress all tracing output by default (overridable by `RUST_LOG`).
    #[default]
    Default,
    /// Show verbose messages.
    Verbose,
    /// Show debug messages by default (overridable by `RUST_LOG`).
    Debug,
    /// Show trace messages by default (overridable by `RUST_LOG`).
    Trace,
    /// Show trace messages for all crates by default (overridable by `RUST_LOG`).
    TraceAll,
}

impl From<u8> for Level {
    fn from(verbose: u8) -> Self {
        match verbose {
            0 => Self::Default,
            1 => Self::Verbose,
            2 => Self::Debug,
            3 => Self::Trace,
            _ => Self::TraceAll,
        }
    }
}

fn setup_logging(level: Level, log_file: Option<&Path>) -> Result<()> {
    let directive = match level {
        Level::Default | Level::Verbose => LevelFilter::OFF.into(),
        Level::Debug => Directive::from_str("popver=debug")?,
        Level::Trace => Directive::from_str("popver=trace")?,
        Level::TraceAll => Directive::from_str("trace")?,
    };

    let stderr_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env()
        .context("Invalid RUST_LOG directive")?;
    let stderr_format = tracing_subscriber::fmt::format()
        .with_target(false)
        .with_ansi(*USE_COLOR);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .event_format(stderr_format)
        .with_writer(anstream::stderr)
        .with_filter(stderr_filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let Some(log_file_path) = log_file else {
        registry.init();
        return Ok(());
    };

    let log_file = fs_err::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_file_path)
        .context("Failed to open log file")?;
    let log_file = Mutex::new(StripStream::new(log_file.into_file()));

    let file_format = tracing_subscriber::fmt::format()
        .with_target(false)
        .with_ansi(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .event_format(file_format)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("popver=trace"));

    registry.with(file_layer).init();

    Ok(())
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    // Enabled ANSI colors on Windows.
    let _ = anstyle_query::windows::enable_ansi_colors();

    ColorChoice::write_global(cli.globals.color.into());

    setup_logging(cli.globals.verbose.into(), cli.globals.log_file.as_deref())?;

    let printer = if cli.globals.quiet == 1 {
        Printer::Quiet
    } else if cli.globals.quiet > 1 {
        Printer::Silent
    } else if cli.globals.verbose > 1 {
        Printer::Verbose
    } else if cli.globals.no_progress {
        Printer::NoProgress
    } else {
        Printer::Default
    };

    if cli.globals.quiet > 0 {
        warnings::disable();
    } else {
        warnings::enable();
    }

    debug!("popver: {}", version::version());
    debug!("Args: {:?}", std::env::args().collect::<Vec<_>>());

    let projects = cli::expand_projects(cli.projects)?;
    let index_url = cli.index_args.index_url();

    cli::inventory(
        projects,
        &index_url,
        cli.index_args.private_index.as_deref(),
        cli.index_args.show,
        cli.index_args.jobs,
        cli.globals.verbose > 0,
        printer,
    )
    .await
}

fn main() -> ExitCode {
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");
    let result = runtime.block_on(Box::pin(run(cli)));
    runtime.shutdown_background();

    match result {
        Ok(code) => code.into(),
        Err(err) => {
            let mut causes = err.chain();
            if let Some(err) = causes.next() {
                eprintln!("{}: {}", "error".red().bold(), err);
            }
            for err in causes {
                eprintln!("  {}: {}", "caused by".red().bold(), err);
            }
            ExitStatus::Error.into()
        }
    }
}
