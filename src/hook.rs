// src/hook.rs

//! Per-component scripting hook
//!
//! Installers often attach a script to a component. The core treats that
//! script as an opaque callback: it is told about lifecycle events and may
//! allow, refuse, or adjust the parameters of the component's operations.

use std::collections::BTreeMap;
use std::fmt;

/// Event delivered to a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    BeforeInstall,
    BeforeUninstall,
    /// Raised by a `HookCall` operation
    Call(String),
    /// Raised when a `HookCall` operation is undone
    UndoCall(String),
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::BeforeInstall => write!(f, "before-install"),
            HookEvent::BeforeUninstall => write!(f, "before-uninstall"),
            HookEvent::Call(name) => write!(f, "{}", name),
            HookEvent::UndoCall(name) => write!(f, "undo-{}", name),
        }
    }
}

/// Hook answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookVerdict {
    Allow,
    Deny(String),
    /// Merge these parameters into the component's operation values
    Modify(BTreeMap<String, String>),
}

pub trait ComponentHook: Send + Sync {
    fn on_event(
        &self,
        component: &str,
        event: &HookEvent,
        params: &BTreeMap<String, String>,
    ) -> HookVerdict;
}

/// Hook that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl ComponentHook for NoopHook {
    fn on_event(&self, _: &str, _: &HookEvent, _: &BTreeMap<String, String>) -> HookVerdict {
        HookVerdict::Allow
    }
}

impl<F> ComponentHook for F
where
    F: Fn(&str, &HookEvent, &BTreeMap<String, String>) -> HookVerdict + Send + Sync,
{
    fn on_event(
        &self,
        component: &str,
        event: &HookEvent,
        params: &BTreeMap<String, String>,
    ) -> HookVerdict {
        self(component, event, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(HookEvent::BeforeInstall.to_string(), "before-install");
        assert_eq!(HookEvent::Call("register".into()).to_string(), "register");
        assert_eq!(HookEvent::UndoCall("register".into()).to_string(), "undo-register");
    }

    #[test]
    fn test_closure_hook() {
        let hook = |component: &str, _: &HookEvent, _: &BTreeMap<String, String>| {
            if component == "blocked" {
                HookVerdict::Deny("not today".into())
            } else {
                HookVerdict::Allow
            }
        };
        let params = BTreeMap::new();
        assert_eq!(
            hook.on_event("a", &HookEvent::BeforeInstall, &params),
            HookVerdict::Allow
        );
        assert!(matches!(
            hook.on_event("blocked", &HookEvent::BeforeInstall, &params),
            HookVerdict::Deny(_)
        ));
        assert_eq!(
            NoopHook.on_event("x", &HookEvent::BeforeUninstall, &params),
            HookVerdict::Allow
        );
    }
}
