// src/commands/progress.rs
//! Progress bar for installer runs
//!
//! Draws the session's overall fraction as a single bar with the current
//! operation as its message.

use indicatif::{ProgressBar, ProgressStyle};
use installkit::{ProgressEvent, ProgressTracker};
use std::time::Duration;

/// Resolution of the bar; fractions are scaled to this many steps
const STEPS: u64 = 1000;

pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(operation: &str) -> Self {
        let bar = ProgressBar::new(STEPS);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.green/dim}] {percent}% {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("##-"),
        );
        bar.set_message(operation.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressTracker for CliProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Fraction { value, message } => {
                self.bar.set_position((value.clamp(0.0, 1.0) * STEPS as f64) as u64);
                if !message.is_empty() {
                    self.bar.set_message(message);
                }
            }
            ProgressEvent::Message(message) => self.bar.set_message(message),
            ProgressEvent::OperationStarted {
                component,
                operation,
            } => self.bar.set_message(format!("{}: {}", component, operation)),
            ProgressEvent::OperationFinished { .. } => {}
            ProgressEvent::Finished(message) => {
                self.bar.set_position(STEPS);
                self.bar.finish_with_message(message);
            }
            ProgressEvent::Error(message) => {
                self.bar.abandon_with_message(format!("[FAILED] {}", message));
            }
        }
    }
}
