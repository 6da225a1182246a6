//! Derivations and the closures instantiation produces.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::realize::Realizer;
use crate::refs::DRef;
use crate::store::StorageSettings;

/// A registered derivation: its address and the two behaviours attached to it.
#[derive(Clone)]
pub struct Derivation {
  pub dref: DRef,
  pub matcher: Arc<dyn Matcher>,
  pub realizer: Arc<dyn Realizer>,
}

impl fmt::Debug for Derivation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Derivation").field("dref", &self.dref).finish_non_exhaustive()
  }
}

/// What a plan function returns: one or more target DRefs.
pub trait Targets {
  fn target_drefs(&self) -> Vec<DRef>;
}

impl Targets for DRef {
  fn target_drefs(&self) -> Vec<DRef> {
    vec![self.clone()]
  }
}

impl Targets for Vec<DRef> {
  fn target_drefs(&self) -> Vec<DRef> {
    self.clone()
  }
}

impl<const N: usize> Targets for [DRef; N] {
  fn target_drefs(&self) -> Vec<DRef> {
    self.to_vec()
  }
}

impl Targets for (DRef, DRef) {
  fn target_drefs(&self) -> Vec<DRef> {
    vec![self.0.clone(), self.1.clone()]
  }
}

impl<K> Targets for BTreeMap<K, DRef> {
  fn target_drefs(&self) -> Vec<DRef> {
    self.values().cloned().collect()
  }
}

/// The targets of one instantiation plus every registered derivation they
/// depend on, in dependency order.
#[derive(Debug, Clone)]
pub struct Closure {
  settings: StorageSettings,
  targets: Vec<DRef>,
  order: Vec<Derivation>,
  deep_deps: BTreeMap<DRef, BTreeSet<DRef>>,
}

impl Closure {
  /// Order the derivations reachable from `targets`.
  ///
  /// `deps` holds the immediate registry-bound dependencies of every bound DRef.
  pub(crate) fn new(
    settings: StorageSettings,
    targets: Vec<DRef>,
    bound: &BTreeMap<DRef, Derivation>,
    deps: &BTreeMap<DRef, BTreeSet<DRef>>,
  ) -> Result<Self> {
    let mut reachable: BTreeSet<DRef> = BTreeSet::new();
    let mut stack: Vec<DRef> = targets.clone();
    while let Some(dref) = stack.pop() {
      if !bound.contains_key(&dref) {
        return Err(Error::MissingDependency { dref });
      }
      if reachable.insert(dref.clone()) {
        stack.extend(deps.get(&dref).into_iter().flatten().cloned());
      }
    }

    let mut graph: DiGraph<DRef, ()> = DiGraph::new();
    let mut nodes: BTreeMap<DRef, NodeIndex> = BTreeMap::new();
    for dref in &reachable {
      nodes.insert(dref.clone(), graph.add_node(dref.clone()));
    }
    for dref in &reachable {
      for dep in deps.get(dref).into_iter().flatten() {
        graph.add_edge(nodes[dep], nodes[dref], ());
      }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| Error::Cycle(graph[cycle.node_id()].clone()))?;

    let mut order = Vec::with_capacity(sorted.len());
    let mut deep_deps: BTreeMap<DRef, BTreeSet<DRef>> = BTreeMap::new();
    for idx in sorted {
      let dref = &graph[idx];
      let mut deep = BTreeSet::new();
      for dep in deps.get(dref).into_iter().flatten() {
        deep.insert(dep.clone());
        deep.extend(deep_deps.get(dep).into_iter().flatten().cloned());
      }
      deep_deps.insert(dref.clone(), deep);
      order.push(bound[dref].clone());
    }

    Ok(Self {
      settings,
      targets,
      order,
      deep_deps,
    })
  }

  pub fn settings(&self) -> &StorageSettings {
    &self.settings
  }

  pub fn targets(&self) -> &[DRef] {
    &self.targets
  }

  /// The single target, or [`Error::MultipleTargets`].
  pub fn target(&self) -> Result<&DRef> {
    match self.targets.as_slice() {
      [target] => Ok(target),
      other => Err(Error::MultipleTargets { count: other.len() }),
    }
  }

  /// Derivations in dependency order: each appears after everything it depends on.
  pub fn derivations(&self) -> &[Derivation] {
    &self.order
  }

  pub fn get(&self, dref: &DRef) -> Option<&Derivation> {
    self.order.iter().find(|d| d.dref == *dref)
  }

  /// Transitive registry-bound dependencies of `dref`.
  pub fn deep_deps(&self, dref: &DRef) -> BTreeSet<DRef> {
    self.deep_deps.get(dref).cloned().unwrap_or_default()
  }

  /// Transitive dependencies of all targets, targets included.
  pub fn target_closure(&self) -> BTreeSet<DRef> {
    let mut all: BTreeSet<DRef> = self.targets.iter().cloned().collect();
    for target in &self.targets {
      all.extend(self.deep_deps(target));
    }
    all
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}
