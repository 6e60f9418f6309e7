// src/progress.rs

//! Progress reporting for installer runs
//!
//! The executor reports through a single `ProgressTracker::report` call with a
//! `ProgressEvent`. Front ends decide how to show it: the CLI draws a bar,
//! headless runs log, wizards and tests take a callback.
//!
//! Progress is a fraction in `0.0..=1.0`. The `ProgressCoordinator` turns
//! operation weights into that fraction and splits a run into phases
//! (downloading, installing) that each own part of the range.
//!
//! # Example
//!
//! ```ignore
//! use installkit::progress::{LogProgress, ProgressCoordinator};
//!
//! let coordinator = ProgressCoordinator::new(Arc::new(LogProgress::new("install")));
//! coordinator.start_phase("Installing", 0.1, 1.0, total_weight);
//! coordinator.advance(op.weight(), "Copying files");
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Overall completion changed
    Fraction { value: f64, message: String },
    /// Status text changed
    Message(String),
    OperationStarted { component: String, operation: String },
    OperationFinished { component: String, operation: String },
    /// Run finished successfully
    Finished(String),
    /// Run finished with an error
    Error(String),
}

/// Sink for progress events
///
/// Implementations must be thread-safe; the executor reports from its worker
/// thread.
pub trait ProgressTracker: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards events, remembering only the last fraction and whether the run
/// ended
#[derive(Debug, Default)]
pub struct SilentProgress {
    fraction_bits: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.fraction_bits.load(Ordering::Relaxed))
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl ProgressTracker for SilentProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Fraction { value, .. } => {
                self.fraction_bits.store(value.to_bits(), Ordering::Relaxed)
            }
            ProgressEvent::Finished(_) | ProgressEvent::Error(_) => {
                self.finished.store(true, Ordering::Relaxed)
            }
            _ => {}
        }
    }
}

/// Logs progress to tracing at info level
///
/// Fractions are only logged when they cross a step boundary, so a run logs
/// about ten progress lines.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    last_step: AtomicU64,
    /// Percent between two logged fractions
    step_percent: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_step: AtomicU64::new(0),
            step_percent: 10,
        }
    }

    pub fn with_step_percent(mut self, step: u64) -> Self {
        self.step_percent = step.max(1);
        self
    }
}

impl ProgressTracker for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Fraction { value, message } => {
                let percent = (value.clamp(0.0, 1.0) * 100.0) as u64;
                let step = percent / self.step_percent;
                let previous = self.last_step.swap(step, Ordering::Relaxed);
                if step != previous {
                    info!("{}: {}% {}", self.name, percent, message);
                }
            }
            ProgressEvent::Message(message) => info!("{}: {}", self.name, message),
            ProgressEvent::OperationStarted { .. } | ProgressEvent::OperationFinished { .. } => {}
            ProgressEvent::Finished(message) => info!("{}: {}", self.name, message),
            ProgressEvent::Error(message) => warn!("{}: ERROR - {}", self.name, message),
        }
    }
}

/// Forwards every event to a closure
///
/// Used for GUI integration and tests.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

#[derive(Debug, Clone, Copy)]
struct Phase {
    start: f64,
    end: f64,
    total: u64,
    done: u64,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            total: 0,
            done: 0,
        }
    }
}

impl Phase {
    fn fraction(&self) -> f64 {
        if self.total == 0 {
            return self.start;
        }
        let local = (self.done.min(self.total) as f64) / (self.total as f64);
        self.start + (self.end - self.start) * local
    }
}

/// Converts weighted work into fractional progress
///
/// Undo walks progress backwards: `retreat` subtracts the weight of an undone
/// operation.
pub struct ProgressCoordinator {
    tracker: Arc<dyn ProgressTracker>,
    phase: Mutex<Phase>,
}

impl ProgressCoordinator {
    pub fn new(tracker: Arc<dyn ProgressTracker>) -> Self {
        Self {
            tracker,
            phase: Mutex::new(Phase::default()),
        }
    }

    pub fn tracker(&self) -> &Arc<dyn ProgressTracker> {
        &self.tracker
    }

    /// Start a phase covering `start..end` of the overall range
    pub fn start_phase(&self, label: &str, start: f64, end: f64, total_weight: u64) {
        self.set_phase(
            label,
            Phase {
                start: start.clamp(0.0, 1.0),
                end: end.clamp(0.0, 1.0),
                total: total_weight,
                done: 0,
            },
        );
    }

    /// Start a phase whose completed work counts down, for undo runs
    pub fn start_undo_phase(&self, label: &str, total_weight: u64) {
        self.set_phase(
            label,
            Phase {
                start: 0.0,
                end: 1.0,
                total: total_weight,
                done: total_weight,
            },
        );
    }

    /// Start a phase of undos inside a forward run
    ///
    /// Each `retreat` moves the fraction from `start` towards `end`.
    pub fn start_removal_phase(&self, label: &str, start: f64, end: f64, total_weight: u64) {
        // Bounds are swapped so that counting down walks forward
        self.set_phase(
            label,
            Phase {
                start: end.clamp(0.0, 1.0),
                end: start.clamp(0.0, 1.0),
                total: total_weight,
                done: total_weight,
            },
        );
    }

    pub fn advance(&self, weight: u64, message: &str) {
        self.update(message, |phase| phase.done = phase.done.saturating_add(weight));
    }

    pub fn retreat(&self, weight: u64, message: &str) {
        self.update(message, |phase| phase.done = phase.done.saturating_sub(weight));
    }

    /// Current overall fraction
    pub fn fraction(&self) -> f64 {
        self.phase.lock().map(|p| p.fraction()).unwrap_or(0.0)
    }

    pub fn report(&self, event: ProgressEvent) {
        self.tracker.report(event);
    }

    fn set_phase(&self, label: &str, phase: Phase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
        self.tracker.report(ProgressEvent::Message(label.to_string()));
        self.emit(phase.fraction(), label);
    }

    fn update(&self, message: &str, change: impl FnOnce(&mut Phase)) {
        let fraction = match self.phase.lock() {
            Ok(mut phase) => {
                change(&mut phase);
                phase.fraction()
            }
            Err(_) => return,
        };
        self.emit(fraction, message);
    }

    fn emit(&self, value: f64, message: &str) {
        self.tracker.report(ProgressEvent::Fraction {
            value,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressTracker>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let tracker: Arc<dyn ProgressTracker> = Arc::new(CallbackProgress::new(move |event| {
            events_clone.lock().unwrap().push(event);
        }));
        (events, tracker)
    }

    fn fractions(events: &[ProgressEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Fraction { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_silent_progress() {
        let progress = SilentProgress::new();
        progress.report(ProgressEvent::Fraction {
            value: 0.5,
            message: String::new(),
        });
        assert_eq!(progress.fraction(), 0.5);
        assert!(!progress.is_finished());
        progress.report(ProgressEvent::Finished("done".into()));
        assert!(progress.is_finished());
    }

    #[test]
    fn test_log_progress_accepts_all_events() {
        let progress = LogProgress::new("test").with_step_percent(25);
        for i in 0..=10 {
            progress.report(ProgressEvent::Fraction {
                value: i as f64 / 10.0,
                message: "working".into(),
            });
        }
        progress.report(ProgressEvent::Error("boom".into()));
        assert_eq!(progress.last_step.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_weighted_phase() {
        let (events, tracker) = recorder();
        let coordinator = ProgressCoordinator::new(tracker);

        coordinator.start_phase("Installing", 0.5, 1.0, 4);
        coordinator.advance(1, "a");
        coordinator.advance(3, "b");

        let captured = events.lock().unwrap();
        assert!(matches!(&captured[0], ProgressEvent::Message(m) if m == "Installing"));
        assert_eq!(fractions(&captured), vec![0.5, 0.625, 1.0]);
    }

    #[test]
    fn test_undo_phase_counts_down() {
        let (events, tracker) = recorder();
        let coordinator = ProgressCoordinator::new(tracker);

        coordinator.start_undo_phase("Rolling back", 2);
        coordinator.retreat(1, "undo b");
        coordinator.retreat(1, "undo a");
        coordinator.retreat(1, "extra");

        let captured = events.lock().unwrap();
        assert_eq!(fractions(&captured), vec![1.0, 0.5, 0.0, 0.0]);
        assert_eq!(coordinator.fraction(), 0.0);
    }

    #[test]
    fn test_removal_phase_moves_forward() {
        let (events, tracker) = recorder();
        let coordinator = ProgressCoordinator::new(tracker);

        coordinator.start_removal_phase("Removing", 0.2, 0.4, 4);
        coordinator.retreat(2, "undo b");
        coordinator.retreat(2, "undo a");

        let captured = events.lock().unwrap();
        let values = fractions(&captured);
        assert_eq!(values.len(), 3);
        assert!((values[0] - 0.2).abs() < 1e-9);
        assert!((values[1] - 0.3).abs() < 1e-9);
        assert!((values[2] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_phase_reports_start() {
        let coordinator = ProgressCoordinator::new(Arc::new(SilentProgress::new()));
        coordinator.start_phase("Downloading", 0.0, 0.2, 0);
        coordinator.advance(5, "ignored");
        assert_eq!(coordinator.fraction(), 0.0);
    }
}
