// src/elevation.rs

//! Scoped administrator rights
//!
//! Operations flagged `admin` run inside an `AdminGuard`. The guard asks an
//! `Elevator` for rights when it is created and hands them back when it is
//! dropped, so rights never outlive a single operation. While held, the guard
//! exposes an `AdminRights` token that operations can inspect.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Source of administrator rights
pub trait Elevator: Send + Sync {
    /// Acquire rights; refusal is `ElevationDenied`
    fn gain_rights(&self) -> Result<()>;
    fn drop_rights(&self);
}

/// Uses the rights the process already has
///
/// Gaining succeeds only when running with effective uid 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessElevator;

impl Elevator for ProcessElevator {
    fn gain_rights(&self) -> Result<()> {
        if nix::unistd::geteuid().is_root() {
            Ok(())
        } else {
            Err(Error::ElevationDenied(
                "administrator rights required, re-run as root".to_string(),
            ))
        }
    }

    fn drop_rights(&self) {}
}

/// Elevator that always grants and counts how often it was asked
///
/// For unprivileged runs where the target needs no special rights.
#[derive(Debug, Default)]
pub struct GrantingElevator {
    grants: AtomicUsize,
    held: AtomicUsize,
}

impl GrantingElevator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times rights were granted
    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    /// Number of guards currently holding rights
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

impl Elevator for GrantingElevator {
    fn gain_rights(&self) -> Result<()> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        self.held.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drop_rights(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Proof that administrator rights are held
#[derive(Debug)]
pub struct AdminRights {
    _private: (),
}

/// Holds administrator rights for its lifetime
pub struct AdminGuard<'a> {
    elevator: &'a dyn Elevator,
    rights: AdminRights,
}

impl<'a> AdminGuard<'a> {
    pub fn acquire(elevator: &'a dyn Elevator, reason: &str) -> Result<Self> {
        elevator.gain_rights().map_err(|e| match e {
            Error::ElevationDenied(msg) => Error::ElevationDenied(format!("{}: {}", reason, msg)),
            other => other,
        })?;
        debug!("Gained administrator rights for {}", reason);
        Ok(Self {
            elevator,
            rights: AdminRights { _private: () },
        })
    }

    pub fn rights(&self) -> &AdminRights {
        &self.rights
    }
}

impl Drop for AdminGuard<'_> {
    fn drop(&mut self) {
        self.elevator.drop_rights();
        debug!("Dropped administrator rights");
    }
}
