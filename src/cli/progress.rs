use indicatif::{ProgressBar, ProgressStyle};
use photo_organizer::{Error, Phase, ProgressSink};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// One indicatif bar per phase; a new phase replaces the previous bar.
pub struct CliSink {
    bar: Mutex<Option<ProgressBar>>,
}

fn label(phase: Phase) -> &'static str {
    match phase {
        Phase::Analyze => "Analyzing",
        Phase::QuickHash => "Quick hashing",
        Phase::FullHash => "Full hashing",
        Phase::Execute => "Executing",
        Phase::Rollback => "Rolling back",
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos}/{len} ({eta} remaining) {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸─")
    .tick_chars(TICK_CHARS)
}

impl CliSink {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressSink for CliSink {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(bar_style());
        pb.set_prefix(label(phase));
        pb.enable_steady_tick(Duration::from_millis(80));
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn on_phase_complete(&self, phase: Phase) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                let done = pb.position();
                pb.finish_and_clear();
                eprintln!("  \x1b[32m✓\x1b[0m {}: {} files", label(phase), done);
            }
        }
    }

    fn on_file_start(&self, _index: usize, _total: usize, path: &Path) {
        self.with_bar(|pb| {
            if let Some(name) = path.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }
        });
    }

    fn on_file_done(&self, _index: usize, _total: usize, _path: &Path) {
        self.with_bar(|pb| pb.inc(1));
    }

    fn on_error(&self, _path: &Path, _error: &Error) {
        self.with_bar(|pb| pb.inc(1));
    }
}
