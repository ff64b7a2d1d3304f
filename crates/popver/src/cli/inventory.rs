use std::fmt::{Display, Write};
use std::num::NonZeroUsize;

use anyhow::Result;
use futures::StreamExt;
use owo_colors::OwoColorize;
use tracing::{debug, instrument, warn};

use crate::cli::reporter::LookupReporter;
use crate::cli::{ExitStatus, Show};
use crate::index::{self, DistributionArtifact, IndexClient, ProjectPage};
use crate::metadata::{Inferred, infer_requires_python};
use crate::printer::Printer;
use crate::report::Tally;
use crate::selection::select;
use crate::transport::{HttpTransport, Transport};
use crate::version_compat::BucketTable;
use crate::warn_user;

/// Why a project did not contribute to the report.
#[derive(Debug)]
enum SkipReason {
    NotFound,
    NoSelectablePackage,
    Filtered(Show),
    Failed(anyhow::Error),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::NoSelectablePackage => write!(f, "no installable versions"),
            Self::Filtered(Show::Public) => write!(f, "found on the private index"),
            Self::Filtered(Show::Private) => write!(f, "not on the private index"),
            Self::Failed(err) => write!(f, "{err:#}"),
        }
    }
}

#[derive(Debug)]
enum Lookup {
    Classified {
        project: String,
        artifact: DistributionArtifact,
        inferred: Option<Inferred>,
    },
    Skipped {
        project: String,
        reason: SkipReason,
    },
}

/// The indexes a run consults, and which of their projects it counts.
struct Indexes<'a, T> {
    transport: &'a T,
    public: IndexClient<'a, T>,
    private: Option<IndexClient<'a, T>>,
    show: Option<Show>,
}

impl<T: Transport> Indexes<'_, T> {
    /// Find the page to use for `project`, preferring the private index.
    async fn project_page(&self, project: &str) -> Result<ProjectPage, SkipReason> {
        if let Some(private) = &self.private {
            match private.get_project_page(project).await {
                Ok(_) if self.show == Some(Show::Public) => {
                    return Err(SkipReason::Filtered(Show::Public));
                }
                Ok(page) => return Ok(page),
                Err(index::Error::NoSuchProject(_)) => {}
                Err(err) => return Err(SkipReason::Failed(err.into())),
            }
        }

        match self.public.get_project_page(project).await {
            Ok(_) if self.show == Some(Show::Private) => Err(SkipReason::Filtered(Show::Private)),
            Ok(page) => Ok(page),
            Err(index::Error::NoSuchProject(_)) => Err(SkipReason::NotFound),
            Err(err) => Err(SkipReason::Failed(err.into())),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn lookup(&self, project: String) -> Lookup {
        let page = match self.project_page(&project).await {
            Ok(page) => page,
            Err(reason) => {
                if let SkipReason::Failed(err) = &reason {
                    warn!("Failed to look up `{project}`: {err:#}");
                } else {
                    debug!("Skipping `{project}`: {reason}");
                }
                return Lookup::Skipped { project, reason };
            }
        };

        let Some(artifact) = select(&page.artifacts).cloned() else {
            debug!("No selectable artifact for `{project}`");
            return Lookup::Skipped {
                project,
                reason: SkipReason::NoSelectablePackage,
            };
        };
        debug!(filename = %artifact.filename, "Selected artifact");

        match infer_requires_python(self.transport, &artifact).await {
            Ok(inferred) => Lookup::Classified {
                project,
                artifact,
                inferred,
            },
            Err(err) => {
                let err = anyhow::Error::from(err);
                warn!("Failed to read metadata of `{}`: {err:#}", artifact.filename);
                Lookup::Skipped {
                    project,
                    reason: SkipReason::Failed(err),
                }
            }
        }
    }
}

/// Look up every project with at most `jobs` lookups in flight, returning results in input
/// order.
async fn lookup_all<T: Transport>(
    indexes: &Indexes<'_, T>,
    projects: Vec<String>,
    jobs: NonZeroUsize,
    reporter: &LookupReporter,
) -> Vec<Lookup> {
    futures::stream::iter(projects)
        .map(move |project| async move {
            let id = reporter.on_lookup_start(&project);
            let lookup = indexes.lookup(project).await;
            reporter.on_lookup_complete(id);
            lookup
        })
        .buffered(jobs.get())
        .collect()
        .await
}

/// Classify the lookups into a tally, describing each one when `verbose`.
fn tally_lookups<'a>(
    lookups: Vec<Lookup>,
    table: &'a BucketTable,
    verbose: bool,
    printer: Printer,
) -> Result<Tally<'a>> {
    let mut tally = Tally::new(table);
    let mut stdout = printer.stdout();

    for lookup in lookups {
        match lookup {
            Lookup::Classified {
                project,
                artifact,
                inferred,
            } => {
                if inferred.is_none() && verbose {
                    writeln!(stdout, "-> {} no version info", artifact.url)?;
                }
                let min_version =
                    table.classify(inferred.as_ref().map(|inferred| inferred.specifier.as_str()));
                tally.add(min_version);
                if verbose {
                    writeln!(
                        stdout,
                        "{project} {min_version} {}",
                        artifact.version.as_deref().unwrap_or_default()
                    )?;
                }
            }
            Lookup::Skipped { project, reason } => {
                if verbose {
                    writeln!(
                        stdout,
                        "{}",
                        format!("{project} skipped: {reason}").dimmed()
                    )?;
                }
            }
        }
    }

    if verbose {
        writeln!(stdout)?;
    }

    Ok(tally)
}

/// Look up `projects` and print how many support each minimum Python version.
pub(crate) async fn inventory(
    projects: Vec<String>,
    index_url: &str,
    private_index: Option<&str>,
    show: Option<Show>,
    jobs: NonZeroUsize,
    verbose: bool,
    printer: Printer,
) -> Result<ExitStatus> {
    if show == Some(Show::Private) && private_index.is_none() {
        warn_user!("`--show private` without `--private-index` skips every project");
    }

    let transport = HttpTransport::default();
    let indexes = Indexes {
        transport: &transport,
        public: IndexClient::new(&transport, index_url)?,
        private: private_index
            .map(|url| IndexClient::new(&transport, url))
            .transpose()?,
        show,
    };
    let table = BucketTable::standard();

    debug!(
        projects = projects.len(),
        index = %indexes.public.base_url(),
        "Looking up projects"
    );
    let reporter = LookupReporter::new(printer, projects.len());
    let lookups = lookup_all(&indexes, projects, jobs, &reporter).await;
    reporter.on_complete();

    let tally = tally_lookups(lookups, &table, verbose, printer)?;
    write!(printer.stdout_important(), "{tally}")?;

    Ok(ExitStatus::Success)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::tests::MemoryTransport;

    const PUBLIC: &str = "https://public.example.com/simple/";
    const PRIVATE: &str = "https://private.example.com/simple/";

    fn json_page(project: &str, requires_python: &str) -> String {
        format!(
            r#"{{"name": "{project}", "files": [{{"filename": "{project}-1.0.tar.gz", "url": "https://files.example.com/{project}-1.0.tar.gz", "requires-python": "{requires_python}"}}]}}"#
        )
    }

    /// `shared` is on both indexes, `public-only` and `private-only` on one each.
    fn fake_indexes() -> MemoryTransport {
        let transport = MemoryTransport::default();
        transport.insert(&format!("{PUBLIC}shared/"), json_page("shared", ">=3.6"));
        transport.insert(&format!("{PRIVATE}shared/"), json_page("shared", ">=3.8"));
        transport.insert(
            &format!("{PUBLIC}public-only/"),
            json_page("public-only", ">=3.7"),
        );
        transport.insert(
            &format!("{PRIVATE}private-only/"),
            json_page("private-only", ">=3.9"),
        );
        transport
    }

    async fn classify(
        transport: &MemoryTransport,
        private: bool,
        show: Option<Show>,
        projects: &[&str],
    ) -> anyhow::Result<Vec<(String, Option<String>)>> {
        let indexes = Indexes {
            transport,
            public: IndexClient::new(transport, PUBLIC)?,
            private: private
                .then(|| IndexClient::new(transport, PRIVATE))
                .transpose()?,
            show,
        };
        let reporter = LookupReporter::new(Printer::Silent, projects.len());
        let projects = projects.iter().map(ToString::to_string).collect();
        let table = BucketTable::standard();

        Ok(lookup_all(&indexes, projects, NonZeroUsize::MIN, &reporter)
            .await
            .into_iter()
            .map(|lookup| match lookup {
                Lookup::Classified {
                    project, inferred, ..
                } => {
                    let min_version = table
                        .classify(inferred.as_ref().map(|inferred| inferred.specifier.as_str()));
                    (project, Some(min_version.to_string()))
                }
                Lookup::Skipped { project, .. } => (project, None),
            })
            .collect())
    }

    fn expected(rows: &[(&str, Option<&str>)]) -> Vec<(String, Option<String>)> {
        rows.iter()
            .map(|(project, label)| ((*project).to_string(), label.map(str::to_string)))
            .collect()
    }

    const PROJECTS: [&str; 4] = ["shared", "public-only", "private-only", "missing"];

    #[tokio::test]
    async fn mixed_cohorts_prefer_private() -> anyhow::Result<()> {
        let transport = fake_indexes();
        assert_eq!(
            classify(&transport, true, None, &PROJECTS).await?,
            expected(&[
                ("shared", Some("3.8")),
                ("public-only", Some("3.7")),
                ("private-only", Some("3.9")),
                ("missing", None),
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn show_public_skips_private_projects() -> anyhow::Result<()> {
        let transport = fake_indexes();
        assert_eq!(
            classify(&transport, true, Some(Show::Public), &PROJECTS).await?,
            expected(&[
                ("shared", None),
                ("public-only", Some("3.7")),
                ("private-only", None),
                ("missing", None),
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn show_private_skips_public_projects() -> anyhow::Result<()> {
        let transport = fake_indexes();
        assert_eq!(
            classify(&transport, true, Some(Show::Private), &PROJECTS).await?,
            expected(&[
                ("shared", Some("3.8")),
                ("public-only", None),
                ("private-only", Some("3.9")),
                ("missing", None),
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn public_index_only() -> anyhow::Result<()> {
        let transport = fake_indexes();
        assert_eq!(
            classify(&transport, false, None, &PROJECTS).await?,
            expected(&[
                ("shared", Some("3.6")),
                ("public-only", Some("3.7")),
                ("private-only", None),
                ("missing", None),
            ])
        );
        assert_eq!(
            classify(&transport, false, Some(Show::Private), &PROJECTS).await?,
            expected(&[
                ("shared", None),
                ("public-only", None),
                ("private-only", None),
                ("missing", None),
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_skipped() -> anyhow::Result<()> {
        let transport = MemoryTransport::default();
        // Every file is yanked.
        transport.insert(
            &format!("{PUBLIC}yanked/"),
            r#"{"files": [{"filename": "yanked-1.0.tar.gz", "url": "https://files.example.com/yanked-1.0.tar.gz", "yanked": true}]}"#,
        );
        // The metadata cannot be fetched.
        transport.insert(
            &format!("{PUBLIC}broken/"),
            r#"{"files": [{"filename": "broken-1.0.tar.gz", "url": "https://files.example.com/broken-1.0.tar.gz"}]}"#,
        );
        transport.insert(&format!("{PUBLIC}fine/"), json_page("fine", ""));

        let indexes = Indexes {
            transport: &transport,
            public: IndexClient::new(&transport, PUBLIC)?,
            private: None,
            show: None,
        };
        let reporter = LookupReporter::new(Printer::Silent, 3);
        let projects = vec!["yanked".to_string(), "broken".to_string(), "fine".to_string()];
        let lookups = lookup_all(&indexes, projects, NonZeroUsize::MIN, &reporter).await;

        assert!(matches!(
            &lookups[0],
            Lookup::Skipped {
                reason: SkipReason::NoSelectablePackage,
                ..
            }
        ));
        assert!(matches!(
            &lookups[1],
            Lookup::Skipped {
                reason: SkipReason::Failed(_),
                ..
            }
        ));

        let table = BucketTable::standard();
        let tally = tally_lookups(lookups, &table, false, Printer::Silent)?;
        assert_eq!(tally.total(), 1);
        assert!(tally.to_string().contains("       1 any      100.0%   0.0%\n"));

        Ok(())
    }
}
