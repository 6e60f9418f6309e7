// src/resolver/plan.rs

//! Resolution plan data structures

use std::collections::HashMap;
use std::fmt;

/// Why a component ended up in the install set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReason {
    /// Chosen by the user, forced, or already installed
    Selected,
    /// Required by the named component
    Dependency(String),
    /// Every auto-dependency of the component is being installed
    Automatic,
}

impl fmt::Display for InstallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallReason::Selected => write!(f, "explicitly selected"),
            InstallReason::Dependency(of) => write!(f, "dependency of {}", of),
            InstallReason::Automatic => write!(f, "automatic dependency"),
        }
    }
}

/// Result of install resolution
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    /// Component keys in install order (dependencies first)
    pub ordered: Vec<String>,
    /// Newline-joined descriptions of every unresolvable requirement
    pub error: Option<String>,
    pub reasons: HashMap<String, InstallReason>,
}

impl InstallPlan {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.reasons.contains_key(key)
    }

    pub fn reason(&self, key: &str) -> Option<&InstallReason> {
        self.reasons.get(key)
    }
}
