use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rustc_hash::FxHashMap;

use crate::printer::Printer;

#[derive(Default, Debug)]
struct BarState {
    /// A map of progress bars, by ID.
    bars: FxHashMap<usize, ProgressBar>,
    /// A monotonic counter for bar IDs.
    id: usize,
}

impl BarState {
    /// Returns a unique ID for a new progress bar.
    fn id(&mut self) -> usize {
        self.id += 1;
        self.id
    }
}

struct ProgressReporter {
    printer: Printer,
    root: ProgressBar,
    state: Arc<Mutex<BarState>>,
    children: MultiProgress,
}

impl ProgressReporter {
    fn new(root: ProgressBar, children: MultiProgress, printer: Printer) -> Self {
        Self {
            printer,
            root,
            state: Arc::default(),
            children,
        }
    }

    fn on_start(&self, msg: impl Into<Cow<'static, str>>) -> usize {
        let mut state = self.state.lock().unwrap();
        let id = state.id();

        let progress = self.children.insert_before(
            &self.root,
            ProgressBar::with_draw_target(None, self.printer.target()),
        );

        progress.set_style(ProgressStyle::with_template("{wide_msg}").unwrap());
        progress.set_message(msg);

        state.bars.insert(id, progress);
        id
    }

    fn on_progress(&self, id: usize) {
        let progress = self.state.lock().unwrap().bars.remove(&id);

        self.root.inc(1);
        if let Some(progress) = progress {
            progress.finish_and_clear();
        }
    }

    fn on_complete(&self) {
        self.root.set_message("");
        self.root.finish_and_clear();
    }
}

impl From<Printer> for ProgressReporter {
    fn from(printer: Printer) -> Self {
        let multi = MultiProgress::with_draw_target(printer.target());
        let root = multi.add(ProgressBar::with_draw_target(None, printer.target()));
        root.enable_steady_tick(Duration::from_millis(200));
        root.set_style(
            ProgressStyle::with_template("{spinner:.white} {msg:.dim} {pos}/{len}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );

        Self::new(root, multi, printer)
    }
}

/// Shows which projects are being looked up, and how many are done.
pub(crate) struct LookupReporter {
    reporter: ProgressReporter,
}

impl LookupReporter {
    pub(crate) fn new(printer: Printer, total: usize) -> Self {
        let reporter = ProgressReporter::from(printer);
        reporter.root.set_length(total as u64);
        reporter
            .root
            .set_message(format!("{}", "Looking up projects...".bold().cyan()));
        Self { reporter }
    }

    pub(crate) fn on_lookup_start(&self, project: &str) -> usize {
        self.reporter
            .on_start(format!("{} {}", "Fetching".bold().cyan(), project.dimmed()))
    }

    pub(crate) fn on_lookup_complete(&self, id: usize) {
        self.reporter.on_progress(id);
    }

    pub(crate) fn on_complete(&self) {
        self.reporter.on_complete();
    }
}
