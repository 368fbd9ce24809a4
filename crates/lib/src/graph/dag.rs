//! Target dependency graph.
//!
//! Targets are registered by name with the names of the targets they depend
//! on. Resolving a request computes the transitive closure of the requested
//! targets, checks that every dependency exists and that the closure is
//! acyclic, and returns the targets in an order where dependencies come
//! before dependents. All of this happens before any command runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use super::target::Target;

/// Errors in the shape of the target graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("target already registered: {0}")]
  Duplicate(String),

  #[error("unknown target: {0}")]
  UnknownTarget(String),

  #[error("target {target} depends on unknown target {dependency}")]
  MissingDependency { target: String, dependency: String },

  /// The offending cycle, first name repeated at the end.
  #[error("dependency cycle detected: {}", .0.join(" -> "))]
  Cycle(Vec<String>),

  #[error("no targets requested and no default targets declared")]
  NoTargets,
}

/// Registered targets plus the default set.
#[derive(Debug, Default, Clone)]
pub struct TargetGraph {
  /// Registration order.
  order: Vec<String>,
  targets: HashMap<String, Arc<Target>>,
  defaults: Vec<String>,
}

impl TargetGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a target.
  ///
  /// Dependencies may name targets registered later; they are checked when a
  /// request is resolved.
  pub fn register(&mut self, target: Target) -> Result<(), GraphError> {
    if self.targets.contains_key(&target.name) {
      return Err(GraphError::Duplicate(target.name));
    }
    self.order.push(target.name.clone());
    self.targets.insert(target.name.clone(), Arc::new(target));
    Ok(())
  }

  /// Targets run when a request names none.
  pub fn set_defaults<I, S>(&mut self, names: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.defaults = names.into_iter().map(Into::into).collect();
  }

  pub fn defaults(&self) -> &[String] {
    &self.defaults
  }

  pub fn get(&self, name: &str) -> Option<&Arc<Target>> {
    self.targets.get(name)
  }

  /// Target names in registration order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.order.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  /// Resolve `requested` (or the defaults when empty) into the ordered list
  /// of targets to execute.
  ///
  /// Every target of the transitive closure appears exactly once, after all
  /// of its dependencies.
  pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<Arc<Target>>, GraphError> {
    let roots: Vec<&str> = if requested.is_empty() {
      if self.defaults.is_empty() {
        return Err(GraphError::NoTargets);
      }
      self.defaults.iter().map(String::as_str).collect()
    } else {
      requested.iter().map(AsRef::as_ref).collect()
    };

    let closure = self.closure(&roots)?;

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for &name in &closure {
      nodes.insert(name, graph.add_node(name));
    }
    for &name in &closure {
      let dependent = nodes[name];
      for dep in &self.targets[name].deps {
        // Edge from dependency to dependent
        graph.add_edge(nodes[dep.as_str()], dependent, ());
      }
    }

    let sorted = toposort(&graph, None).map_err(|_| GraphError::Cycle(self.find_cycle(&graph)))?;

    Ok(sorted.into_iter().map(|idx| Arc::clone(&self.targets[graph[idx]])).collect())
  }

  /// Names reachable from `roots` through dependencies, in discovery order.
  fn closure<'a>(&'a self, roots: &[&'a str]) -> Result<Vec<&'a str>, GraphError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<&str> = roots.iter().rev().copied().collect();

    for root in roots {
      if !self.targets.contains_key(*root) {
        return Err(GraphError::UnknownTarget(root.to_string()));
      }
    }

    while let Some(name) = stack.pop() {
      if !seen.insert(name) {
        continue;
      }
      let target = &self.targets[name];
      for dep in target.deps.iter().rev() {
        if !self.targets.contains_key(dep) {
          return Err(GraphError::MissingDependency {
            target: name.to_string(),
            dependency: dep.clone(),
          });
        }
        stack.push(dep.as_str());
      }
      out.push(name);
    }

    Ok(out)
  }

  /// Name one cycle of `graph` in dependency direction (`a -> b` means `a`
  /// depends on `b`).
  fn find_cycle(&self, graph: &DiGraph<&str, ()>) -> Vec<String> {
    let component = tarjan_scc(graph)
      .into_iter()
      .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
      .unwrap_or_default();

    let members: HashSet<&str> = component.iter().map(|idx| graph[*idx]).collect();
    let Some(start) = component.iter().map(|idx| graph[*idx]).min() else {
      return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
      let Some(next) = self.targets[current].deps.iter().map(String::as_str).find(|d| members.contains(d)) else {
        break;
      };
      if let Some(pos) = path.iter().position(|n| *n == next) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
        cycle.push(next.to_string());
        return cycle;
      }
      path.push(next);
      current = next;
    }

    path.into_iter().map(str::to_string).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::target::action_fn;

  fn target(name: &str, deps: &[&str]) -> Target {
    Target::sequential(name, action_fn(|_, _| Ok(Vec::new()))).deps(deps.iter().copied())
  }

  fn graph(specs: &[(&str, &[&str])]) -> TargetGraph {
    let mut graph = TargetGraph::new();
    for (name, deps) in specs {
      graph.register(target(name, deps)).unwrap();
    }
    graph
  }

  fn names(targets: &[Arc<Target>]) -> Vec<&str> {
    targets.iter().map(|t| t.name.as_str()).collect()
  }

  #[test]
  fn duplicate_registration_fails() {
    let mut graph = graph(&[("build", &[])]);
    assert_eq!(
      graph.register(target("build", &[])),
      Err(GraphError::Duplicate("build".to_string()))
    );
  }

  #[test]
  fn linear_chain_orders_dependencies_first() {
    let graph = graph(&[("valid", &["build"]), ("build", &["configure"]), ("configure", &[])]);

    let order = graph.resolve(&["valid"]).unwrap();
    assert_eq!(names(&order), vec!["configure", "build", "valid"]);
  }

  #[test]
  fn diamond_runs_shared_dependency_once() {
    //      prepare
    //      /     \
    //   build   docs
    //      \     /
    //      package
    let graph = graph(&[
      ("prepare", &[]),
      ("build", &["prepare"]),
      ("docs", &["prepare"]),
      ("package", &["build", "docs"]),
    ]);

    let order = graph.resolve(&["package"]).unwrap();
    let order = names(&order);
    assert_eq!(order.len(), 4);

    let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
    assert!(pos("prepare") < pos("build"));
    assert!(pos("prepare") < pos("docs"));
    assert!(pos("build") < pos("package"));
    assert!(pos("docs") < pos("package"));
  }

  #[test]
  fn only_the_closure_is_resolved() {
    let graph = graph(&[("clean", &[]), ("configure", &[]), ("build", &["configure"])]);

    let order = graph.resolve(&["build"]).unwrap();
    assert_eq!(names(&order), vec!["configure", "build"]);
  }

  #[test]
  fn repeated_request_is_deduplicated() {
    let graph = graph(&[("configure", &[]), ("build", &["configure"])]);

    let order = graph.resolve(&["build", "configure", "build"]).unwrap();
    assert_eq!(names(&order), vec!["configure", "build"]);
  }

  #[test]
  fn two_node_cycle_is_named() {
    let graph = graph(&[("a", &["b"]), ("b", &["a"])]);

    let err = graph.resolve(&["a"]).unwrap_err();
    assert_eq!(err, GraphError::Cycle(vec!["a".into(), "b".into(), "a".into()]));
    assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
  }

  #[test]
  fn self_dependency_is_a_cycle() {
    let graph = graph(&[("loop", &["loop"])]);
    assert_eq!(
      graph.resolve(&["loop"]).unwrap_err(),
      GraphError::Cycle(vec!["loop".into(), "loop".into()])
    );
  }

  #[test]
  fn cycle_behind_an_entry_point() {
    let graph = graph(&[("top", &["x"]), ("x", &["y"]), ("y", &["z"]), ("z", &["x"])]);

    let GraphError::Cycle(cycle) = graph.resolve(&["top"]).unwrap_err() else {
      panic!("expected cycle");
    };
    assert_eq!(cycle, vec!["x", "y", "z", "x"]);
  }

  #[test]
  fn missing_dependency_is_named() {
    let graph = graph(&[("build", &["configure"])]);
    assert_eq!(
      graph.resolve(&["build"]).unwrap_err(),
      GraphError::MissingDependency {
        target: "build".to_string(),
        dependency: "configure".to_string(),
      }
    );
  }

  #[test]
  fn unknown_requested_target() {
    let graph = graph(&[("build", &[])]);
    assert_eq!(
      graph.resolve(&["deploy"]).unwrap_err(),
      GraphError::UnknownTarget("deploy".to_string())
    );
  }

  #[test]
  fn empty_request_uses_defaults() {
    let mut graph = graph(&[("configure", &[]), ("build", &["configure"]), ("valid", &["build"])]);
    assert_eq!(graph.resolve::<&str>(&[]).unwrap_err(), GraphError::NoTargets);

    graph.set_defaults(["build"]);
    let order = graph.resolve::<&str>(&[]).unwrap();
    assert_eq!(names(&order), vec!["configure", "build"]);
  }
}
