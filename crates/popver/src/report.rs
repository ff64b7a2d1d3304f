use std::fmt;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::version_compat::{BucketTable, MinVersion};

const CDF1_HELP: &str =
    "cdf1: Fraction of libs available to this version of python (carrot, add new ones)";
const CDF2_HELP: &str = "cdf2: Fraction of libs unavailable if this is the newest you have (stick, remove old ones as they are less useful)";

/// Number of projects per minimum version.
#[derive(Debug)]
pub(crate) struct Tally<'a> {
    table: &'a BucketTable,
    counts: FxHashMap<MinVersion, usize>,
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    pub(crate) count: usize,
    pub(crate) min_version: MinVersion,
    /// Percentage of projects usable with this version or any newer one.
    pub(crate) cdf1: f64,
    /// Percentage of projects that need something newer than this version.
    pub(crate) cdf2: f64,
}

impl<'a> Tally<'a> {
    pub(crate) fn new(table: &'a BucketTable) -> Self {
        Self {
            table,
            counts: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, min_version: MinVersion) {
        *self.counts.entry(min_version).or_default() += 1;
    }

    pub(crate) fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Rows in table order, sentinels last, with running cumulative fractions.
    pub(crate) fn rows(&self) -> Vec<Row> {
        let total = self.total();
        let mut so_far = 0;
        self.counts
            .iter()
            .map(|(min_version, count)| (*min_version, *count))
            .sorted_by_key(|(min_version, _)| self.table.position(*min_version))
            .map(|(min_version, count)| {
                so_far += count;
                #[allow(clippy::cast_precision_loss)]
                let percent = |n: usize| n as f64 * 100.0 / total as f64;
                Row {
                    count,
                    min_version,
                    cdf1: percent(so_far),
                    cdf2: percent(total - so_far),
                }
            })
            .collect()
    }
}

/// The report table followed by the column legend.
impl fmt::Display for Tally<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>8} {:<8} {:>6} {:>6}", "count", "minver", "cdf1", "cdf2")?;
        for row in self.rows() {
            writeln!(
                f,
                "{:>8} {:<8} {:>6} {:>6}",
                row.count,
                row.min_version.as_str(),
                format!("{:.1}%", row.cdf1),
                format!("{:.1}%", row.cdf2),
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{CDF1_HELP}")?;
        writeln!(f, "{CDF2_HELP}")
    }
}
