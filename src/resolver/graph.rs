// src/resolver/graph.rs

//! Dependency graph data structures and algorithms
//!
//! Nodes are component keys, kept in declaration order. An edge `from -> to`
//! means `from` depends on `to`, so `to` sorts first. Ties between nodes that
//! are ready at the same time go to the one declared first, which keeps
//! orders stable between runs.

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Dependency graph for ordering
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Keys in declaration order
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Map from key to the keys it depends on
    edges: HashMap<String, Vec<String>>,
    /// Map from key to the keys that depend on it (reverse edges)
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing key is a no-op
    pub fn add_node(&mut self, key: &str) {
        if !self.index.contains_key(key) {
            self.index.insert(key.to_string(), self.nodes.len());
            self.nodes.push(key.to_string());
        }
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let deps = self.edges.entry(from.to_string()).or_default();
        if deps.iter().any(|d| d == to) {
            return;
        }
        deps.push(to.to_string());
        self.reverse_edges
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys `key` depends on
    pub fn get_dependencies(&self, key: &str) -> &[String] {
        self.edges.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Keys that depend on `key`
    pub fn get_dependents(&self, key: &str) -> &[String] {
        self.reverse_edges
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Returns keys with every dependency before its dependents. Edges to
    /// keys that are not nodes are ignored. A cycle is reported with its path.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for (i, key) in self.nodes.iter().enumerate() {
            in_degree[i] = self
                .get_dependencies(key)
                .iter()
                .filter(|d| self.contains(d))
                .count();
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(i) = ready.pop_first() {
            let key = &self.nodes[i];
            result.push(key.clone());

            for dependent in self.get_dependents(key) {
                if let Some(&j) = self.index.get(dependent) {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        ready.insert(j);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let cycle = self
                .detect_cycle()
                .unwrap_or_else(|| self.unsorted(&result));
            return Err(Error::CyclicDependency(cycle));
        }

        Ok(result)
    }

    /// Find a dependency cycle
    ///
    /// Returns the cycle as a path that starts and ends with the same key,
    /// e.g. `[A, B, A]`.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for key in &self.nodes {
            if !visited.contains(key)
                && let Some(cycle) = self.dfs_cycle_detect(key, &mut visited, &mut stack)
            {
                return Some(cycle);
            }
        }
        None
    }

    /// DFS helper for cycle detection; `stack` holds the current path
    fn dfs_cycle_detect(
        &self,
        key: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(key.to_string());
        stack.push(key.to_string());

        for dep in self.get_dependencies(key) {
            if !self.contains(dep) {
                continue;
            }
            if let Some(pos) = stack.iter().position(|k| k == dep) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep)
                && let Some(cycle) = self.dfs_cycle_detect(dep, visited, stack)
            {
                return Some(cycle);
            }
        }

        stack.pop();
        None
    }

    /// Every key that depends on `key`, directly or transitively
    pub fn find_dependents(&self, key: &str) -> Vec<String> {
        let mut found = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(key.to_string());

        while let Some(current) = queue.pop_front() {
            for dependent in self.get_dependents(&current) {
                if dependent != key && found.insert(dependent.clone()) {
                    result.push(dependent.clone());
                    queue.push_back(dependent.clone());
                }
            }
        }
        result
    }

    fn unsorted(&self, sorted: &[String]) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|k| !sorted.contains(k))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for node in nodes {
            graph.add_node(node);
        }
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    #[test]
    fn test_dependencies_first() {
        let g = graph(&["app", "lib", "base"], &[("app", "lib"), ("lib", "base")]);
        assert_eq!(g.topological_sort().unwrap(), vec!["base", "lib", "app"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let g = graph(&["c", "a", "b", "dep"], &[("a", "dep")]);
        assert_eq!(g.topological_sort().unwrap(), vec!["c", "b", "dep", "a"]);
    }

    #[test]
    fn test_cycle_path() {
        let g = graph(&["A", "B", "C"], &[("A", "B"), ("B", "A"), ("C", "A")]);
        let err = g.topological_sort().unwrap_err();
        match err {
            Error::CyclicDependency(path) => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_edges_outside_graph_ignored() {
        let g = graph(&["app"], &[("app", "external")]);
        assert_eq!(g.topological_sort().unwrap(), vec!["app"]);
        assert!(g.detect_cycle().is_none());
    }

    #[test]
    fn test_find_dependents() {
        let g = graph(
            &["base", "lib", "app", "other"],
            &[("lib", "base"), ("app", "lib")],
        );
        assert_eq!(g.find_dependents("base"), vec!["lib", "app"]);
        assert!(g.find_dependents("other").is_empty());
    }
}
