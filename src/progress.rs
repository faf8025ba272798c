//! Terminal progress for job runs

use crate::ui;
use colored::Colorize;
use jobkit::{RunObserver, StepKind, Store};

/// Prints one line per step to stderr
pub struct TerminalProgress {
    quiet: bool,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl RunObserver for TerminalProgress {
    fn on_step_start(&mut self, id: usize, kind: StepKind, name: &str) {
        if self.quiet {
            return;
        }
        eprintln!("{} {}", ui::step_label(id, kind.key()).blue().bold(), name);
    }

    fn on_step_complete(&mut self, _id: usize, kind: StepKind, deployed: usize) {
        if self.quiet || kind != StepKind::Render {
            return;
        }
        ui::dim(&format!("{deployed} resource{}", ui::plural(deployed)));
    }

    fn on_step_skipped(&mut self, id: usize, kind: StepKind, reason: &str) {
        ui::warn(&format!("{} skipped: {reason}", ui::step_label(id, kind.key()).trim_end()));
    }

    fn on_prune(&mut self, id: usize, deployed: usize, store: &Store) {
        if self.quiet {
            return;
        }
        eprintln!(
            "{} {}/{}: keeping {deployed} resource{}",
            ui::step_label(id, "prune").blue().bold(),
            store.namespace,
            store.name,
            ui::plural(deployed)
        );
    }
}
