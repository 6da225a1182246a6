//! Turning a plan function into a closure.
//!
//! The plan registers derivations into a [`Registry`]; each registration
//! writes the config to the store (idempotently) and binds the DRef to its
//! matcher and realizer for this instantiation only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, ConfigHash};
use crate::error::{Error, Result};
use crate::graph::{Closure, Derivation, Targets};
use crate::matcher::Matcher;
use crate::realize::Realizer;
use crate::recursion::{Frame, enter};
use crate::refs::DRef;
use crate::store::StorageSettings;
use crate::store::commit::{Committed, commit_config};
use crate::store::query::rref_exists;

/// Derivations bound during one instantiation.
#[derive(Debug)]
pub struct Registry {
  settings: StorageSettings,
  bound: BTreeMap<DRef, Derivation>,
  deps: BTreeMap<DRef, BTreeSet<DRef>>,
  weak: BTreeMap<ConfigHash, DRef>,
  overwrites: Vec<DRef>,
  strict: bool,
}

impl Registry {
  pub fn new(settings: StorageSettings) -> Self {
    Self {
      settings,
      bound: BTreeMap::new(),
      deps: BTreeMap::new(),
      weak: BTreeMap::new(),
      overwrites: Vec::new(),
      strict: false,
    }
  }

  /// A registry that refuses to rebind an already registered DRef.
  pub fn strict(mut self) -> Self {
    self.strict = true;
    self
  }

  pub fn settings(&self) -> &StorageSettings {
    &self.settings
  }

  /// DRefs whose binding was replaced by a later registration, in order.
  pub fn overwrites(&self) -> &[DRef] {
    &self.overwrites
  }

  pub fn is_bound(&self, dref: &DRef) -> bool {
    self.bound.contains_key(dref)
  }

  /// Register a derivation and return its DRef.
  pub fn mk_derivation(
    &mut self,
    config: Config,
    matcher: impl Matcher + 'static,
    realizer: impl Realizer + 'static,
  ) -> Result<DRef> {
    self.mk_derivation_arc(config, Arc::new(matcher), Arc::new(realizer))
  }

  pub fn mk_derivation_arc(
    &mut self,
    config: Config,
    matcher: Arc<dyn Matcher>,
    realizer: Arc<dyn Realizer>,
  ) -> Result<DRef> {
    let dref = config.dref();
    let deps = self.check_references(&dref, &config)?;

    if self.bound.contains_key(&dref) && self.strict {
      return Err(Error::Rebind { dref });
    }

    let (_, committed) = commit_config(&self.settings, &config)?;
    if committed == Committed::New {
      debug!(dref = %dref, "new derivation");
    }

    let weak = config.weak_hash();
    match self.weak.get(&weak) {
      Some(other) if *other != dref => {
        debug!(dref = %dref, other = %other, "configs differ only in private fields");
      }
      Some(_) => {}
      None => {
        self.weak.insert(weak, dref.clone());
      }
    }

    let derivation = Derivation {
      dref: dref.clone(),
      matcher,
      realizer,
    };
    if self.bound.insert(dref.clone(), derivation).is_some() {
      warn!(dref = %dref, "derivation registered twice, keeping the latest matcher and realizer");
      self.overwrites.push(dref.clone());
    }
    self.deps.insert(dref.clone(), deps);

    Ok(dref)
  }

  /// DRefs must be bound here; RRefs must already be realized and must not
  /// belong to a derivation bound here. Returns the registry-bound deps.
  fn check_references(&self, dref: &DRef, config: &Config) -> Result<BTreeSet<DRef>> {
    let refs = config.references()?;
    for dep in &refs.drefs {
      if !self.bound.contains_key(dep) {
        return Err(Error::ForeignReference {
          dref: dref.clone(),
          reference: dep.to_string(),
        });
      }
    }
    for rref in &refs.rrefs {
      if self.bound.contains_key(rref.dref()) || !rref_exists(&self.settings, rref) {
        return Err(Error::ForeignReference {
          dref: dref.clone(),
          reference: rref.to_string(),
        });
      }
    }
    Ok(refs.drefs)
  }

  fn into_closure(self, targets: Vec<DRef>) -> Result<Closure> {
    Closure::new(self.settings, targets, &self.bound, &self.deps)
  }
}

/// Register a derivation into `registry`. See [`Registry::mk_derivation`].
pub fn mk_derivation(
  registry: &mut Registry,
  config: Config,
  matcher: impl Matcher + 'static,
  realizer: impl Realizer + 'static,
) -> Result<DRef> {
  registry.mk_derivation(config, matcher, realizer)
}

/// Run `plan` against a fresh registry and return its result together with
/// the closure of the DRefs it returned.
///
/// Nested calls on the same thread fail with [`Error::Recursion`].
pub fn instantiate<R, F>(settings: &StorageSettings, plan: F) -> Result<(R, Closure)>
where
  R: Targets,
  F: FnOnce(&mut Registry) -> Result<R>,
{
  instantiate_with(Registry::new(settings.clone()), plan)
}

/// Like [`instantiate`] with a caller-configured registry (e.g. [`Registry::strict`]).
pub fn instantiate_with<R, F>(registry: Registry, plan: F) -> Result<(R, Closure)>
where
  R: Targets,
  F: FnOnce(&mut Registry) -> Result<R>,
{
  let _guard = enter(Frame::Instantiate)?;
  registry.settings().init()?;

  let mut registry = registry;
  let result = plan(&mut registry)?;
  let targets = result.target_drefs();
  let closure = registry.into_closure(targets)?;

  info!(
    targets = closure.targets().len(),
    derivations = closure.len(),
    "instantiated"
  );
  Ok((result, closure))
}
