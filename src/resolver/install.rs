// src/resolver/install.rs

//! Install closure
//!
//! Expands the components marked for installation with everything they
//! depend on, then adds components whose auto-dependencies are all present.
//! Unresolvable requirements are collected rather than aborting, so a caller
//! can show every problem at once. Cycles are fatal.

use super::graph::DependencyGraph;
use super::plan::{InstallPlan, InstallReason};
use crate::components::{Component, ComponentSet};
use crate::error::{Error, Result};
use crate::role::Role;
use crate::version::{ComponentVersion, DependencyRequirement};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Keys the user (or the role) wants installed, in declaration order
///
/// Update roles take the update-requested components. Other roles take what
/// is selected and not installed, what is installed and not being removed,
/// and forced installations.
pub fn components_marked_for_installation(set: &ComponentSet, role: Role) -> Vec<String> {
    set.iter()
        .filter(|c| !c.synthetic && c.enabled)
        .filter(|c| {
            if role.is_update_only() {
                c.update_requested
            } else {
                c.is_selected_for_installation()
                    || (c.installed && !c.uninstall_requested)
                    || c.forced_installation
            }
        })
        .map(|c| c.key.clone())
        .collect()
}

/// Version a dependency is checked against
///
/// An installed component that is not being updated keeps its installed
/// version.
pub fn effective_version(component: &Component) -> &ComponentVersion {
    match &component.installed_version {
        Some(installed) if component.installed && !component.update_requested => installed,
        _ => &component.version,
    }
}

/// Find the component satisfying `requirement`
fn resolve_requirement<'a>(
    set: &'a ComponentSet,
    requirement: &DependencyRequirement,
) -> std::result::Result<&'a Component, String> {
    let candidate = set
        .find(&requirement.name)
        .ok_or_else(|| format!("Cannot find missing dependency \"{}\"", requirement))?;

    match &requirement.version {
        Some(req) if !req.matches(effective_version(candidate)) => Err(format!(
            "Cannot find dependency \"{}\": found version {}",
            requirement,
            effective_version(candidate)
        )),
        _ => Ok(candidate),
    }
}

struct InstallResolver<'a> {
    set: &'a ComponentSet,
    included: HashSet<String>,
    reasons: HashMap<String, InstallReason>,
    /// Resolved dependency edges, recorded for ordering
    graph: DependencyGraph,
    errors: Vec<String>,
    stack: Vec<String>,
}

impl<'a> InstallResolver<'a> {
    fn new(set: &'a ComponentSet) -> Self {
        Self {
            set,
            included: HashSet::new(),
            reasons: HashMap::new(),
            graph: DependencyGraph::new(),
            errors: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Add `key` and its transitive dependencies
    fn visit(&mut self, key: &str, reason: InstallReason) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|k| k == key) {
            let mut cycle = self.stack[pos..].to_vec();
            cycle.push(key.to_string());
            return Err(Error::CyclicDependency(cycle));
        }
        if self.included.contains(key) {
            return Ok(());
        }
        let set = self.set;
        let Some(component) = set.get(key) else {
            self.errors
                .push(format!("Cannot find missing dependency \"{}\"", key));
            return Ok(());
        };

        self.reasons.entry(key.to_string()).or_insert(reason);
        self.stack.push(key.to_string());

        for raw in &component.dependencies {
            let requirement = match DependencyRequirement::parse(raw) {
                Ok(req) => req,
                Err(e) => {
                    self.errors.push(format!("{}: {}", component.key, e));
                    continue;
                }
            };
            match resolve_requirement(set, &requirement) {
                Ok(dependency) => {
                    let dep_key = dependency.key.clone();
                    self.graph.add_edge(key, &dep_key);
                    self.visit(&dep_key, InstallReason::Dependency(key.to_string()))?;
                }
                Err(message) => {
                    warn!("{} (required by {})", message, component.key);
                    self.errors
                        .push(format!("{} required by \"{}\"", message, component.key));
                }
            }
        }

        self.stack.pop();
        self.included.insert(key.to_string());
        Ok(())
    }

    /// Whether every auto-dependency of `component` is being installed
    fn auto_dependencies_satisfied(&self, component: &Component) -> bool {
        !component.auto_dependencies.is_empty()
            && component.auto_dependencies.iter().all(|raw| {
                DependencyRequirement::parse(raw)
                    .ok()
                    .and_then(|req| self.set.find(&req.name))
                    .is_some_and(|c| self.included.contains(&c.key))
            })
    }

    /// Add auto-dependent components until nothing changes
    fn apply_auto_dependencies(&mut self) -> Result<()> {
        loop {
            let ready: Vec<String> = self
                .set
                .iter()
                .filter(|c| c.enabled && !c.synthetic && !self.included.contains(&c.key))
                .filter(|c| !(c.installed && c.uninstall_requested))
                .filter(|c| self.auto_dependencies_satisfied(c))
                .map(|c| c.key.clone())
                .collect();

            if ready.is_empty() {
                return Ok(());
            }
            let set = self.set;
            for key in ready {
                debug!("Adding {} as automatic dependency", key);
                if let Some(component) = set.get(&key) {
                    // Order after the components that pulled it in
                    for raw in &component.auto_dependencies {
                        if let Some(dep) = DependencyRequirement::parse(raw)
                            .ok()
                            .and_then(|req| set.find(&req.name))
                        {
                            self.graph.add_edge(&key, &dep.key);
                        }
                    }
                }
                self.visit(&key, InstallReason::Automatic)?;
            }
        }
    }

    fn into_plan(self) -> Result<InstallPlan> {
        let mut graph = DependencyGraph::new();
        for key in self.set.keys() {
            if self.included.contains(key) {
                graph.add_node(key);
            }
        }
        for key in self.set.keys() {
            for dep in self.graph.get_dependencies(key) {
                graph.add_edge(key, dep);
            }
        }

        let ordered = graph.topological_sort()?;
        let error = if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("\n"))
        };

        Ok(InstallPlan {
            ordered,
            error,
            reasons: self.reasons,
        })
    }
}

/// Resolve the ordered install set for `inputs`
pub fn resolve_install(set: &ComponentSet, inputs: &[String]) -> Result<InstallPlan> {
    let mut resolver = InstallResolver::new(set);

    for key in inputs {
        resolver.visit(key, InstallReason::Selected)?;
    }
    resolver.apply_auto_dependencies()?;

    let plan = resolver.into_plan()?;
    debug!(
        "Resolved {} components to install from {} inputs",
        plan.ordered.len(),
        inputs.len()
    );
    Ok(plan)
}
