// src/executor.rs

//! Operation executor
//!
//! Runs operations one at a time on a scoped worker thread while the calling
//! thread waits. Cancellation is cooperative: the shared flag is checked
//! between operations, never inside one. Operations flagged `admin` run under
//! an `AdminGuard` scoped to that single operation.
//!
//! The executor does not own any log. Callers pass a closure that records
//! each performed (or undone) operation, so the installed registry can be
//! saved after every step.

use crate::elevation::{AdminGuard, Elevator};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationContext};
use crate::progress::{ProgressCoordinator, ProgressEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, warn};

/// Summary of an undo pass
#[derive(Debug, Default)]
pub struct UndoReport {
    pub undone: usize,
    /// Operations whose undo failed or was refused; their records are kept
    pub failed: Vec<String>,
}

impl UndoReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Executor<'a> {
    ctx: OperationContext<'a>,
    elevator: &'a dyn Elevator,
    progress: &'a ProgressCoordinator,
    cancel: Arc<AtomicBool>,
}

impl<'a> Executor<'a> {
    pub fn new(
        ctx: OperationContext<'a>,
        elevator: &'a dyn Elevator,
        progress: &'a ProgressCoordinator,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            elevator,
            progress,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> &ProgressCoordinator {
        self.progress
    }

    /// Run `work` on a scoped worker thread and wait for it
    pub fn run_on_worker<T, F>(&self, label: &str, work: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        thread::scope(|scope| {
            let handle = scope.spawn(work);
            handle
                .join()
                .map_err(|_| Error::operation(label, "worker thread panicked"))?
        })
    }

    /// Perform `operations` in order
    ///
    /// `on_performed` is called after each successful perform, and for a
    /// failed one that already captured undo state (a backup, a partially
    /// created directory). The first failure stops the run; everything that
    /// changed the system has been handed to `on_performed`, so the caller
    /// can undo it.
    pub fn perform_all<F>(&self, operations: &mut [Operation], mut on_performed: F) -> Result<()>
    where
        F: FnMut(&Operation) -> Result<()>,
    {
        for op in operations.iter_mut() {
            if self.is_cancelled() {
                return Err(Error::Cancelled(format!(
                    "Installation canceled before {}",
                    op.describe()
                )));
            }

            let component = op.component().to_string();
            self.progress.report(ProgressEvent::OperationStarted {
                component: component.clone(),
                operation: op.name().to_string(),
            });

            if let Err(e) = self.perform(op) {
                // A failure past backup is recorded so rollback can undo it
                if op.has_undo_state() {
                    debug!("Recording failed {} for rollback", op.describe());
                    if let Err(record) = on_performed(op) {
                        warn!("Failed to record {}: {}", op.describe(), record);
                    }
                }
                return Err(e);
            }
            on_performed(op)?;

            self.progress.advance(op.weight(), &op.describe());
            self.progress.report(ProgressEvent::OperationFinished {
                component,
                operation: op.name().to_string(),
            });
        }
        Ok(())
    }

    /// Undo `operations` newest-first
    ///
    /// Undo never stops early. A failed or refused undo is logged, its record
    /// is kept (no `on_undone` call) and the pass continues.
    pub fn undo_all<F>(&self, operations: &[Operation], mut on_undone: F) -> UndoReport
    where
        F: FnMut(&Operation) -> Result<()>,
    {
        let mut report = UndoReport::default();

        for op in operations.iter().rev() {
            match self.undo(op) {
                Ok(()) => {
                    if let Err(e) = on_undone(op) {
                        warn!("Failed to record undo of {}: {}", op.describe(), e);
                    }
                    report.undone += 1;
                    self.progress.retreat(op.weight(), &op.describe());
                }
                Err(e @ Error::ElevationDenied(_)) => {
                    error!("Skipping undo of {}: {}", op.describe(), e);
                    report.failed.push(format!("{}: {}", op.describe(), e));
                }
                Err(e) => {
                    error!("Undo of {} failed: {}", op.describe(), e);
                    report.failed.push(format!("{}: {}", op.describe(), e));
                }
            }
        }

        debug!(
            "Undo pass finished: {} undone, {} failed",
            report.undone,
            report.failed.len()
        );
        report
    }

    /// Backup and perform one operation
    pub fn perform(&self, op: &mut Operation) -> Result<()> {
        let guard = self.guard_for(op)?;
        let ctx = OperationContext {
            rights: guard.as_ref().map(|g| g.rights()),
            ..self.ctx
        };
        let label = op.name();

        self.run_on_worker(label, || {
            op.backup(&ctx)?;
            op.perform(&ctx)
        })
    }

    /// Undo one operation
    pub fn undo(&self, op: &Operation) -> Result<()> {
        let guard = self.guard_for(op)?;
        let ctx = OperationContext {
            rights: guard.as_ref().map(|g| g.rights()),
            ..self.ctx
        };

        self.run_on_worker(op.name(), || op.undo(&ctx))
    }

    fn guard_for(&self, op: &Operation) -> Result<Option<AdminGuard<'a>>> {
        if !op.is_admin() {
            return Ok(None);
        }
        AdminGuard::acquire(self.elevator, &op.describe()).map(Some)
    }
}
