//! Run observer callbacks
//!
//! These let a front end report progress without the orchestrator
//! depending on any particular terminal or UI implementation.

use crate::executor::Store;
use crate::step::StepKind;

/// Receives progress updates while a job runs
pub trait RunObserver {
    /// Called before a step is dispatched; `name` is the template base name
    /// or the wait flags
    fn on_step_start(&mut self, id: usize, kind: StepKind, name: &str);

    /// Called after a step finished; `deployed` counts resources applied
    fn on_step_complete(&mut self, id: usize, kind: StepKind, deployed: usize);

    /// Called when a step is skipped
    fn on_step_skipped(&mut self, id: usize, kind: StepKind, reason: &str);

    /// Called before pruning
    fn on_prune(&mut self, id: usize, deployed: usize, store: &Store);
}

/// No-op observer
pub struct NoProgress;

impl RunObserver for NoProgress {
    fn on_step_start(&mut self, _id: usize, _kind: StepKind, _name: &str) {}
    fn on_step_complete(&mut self, _id: usize, _kind: StepKind, _deployed: usize) {}
    fn on_step_skipped(&mut self, _id: usize, _kind: StepKind, _reason: &str) {}
    fn on_prune(&mut self, _id: usize, _deployed: usize, _store: &Store) {}
}
