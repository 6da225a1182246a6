//! The Context: which realizations each derivation resolved to.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::refs::{DRef, RRef};

/// Map from DRef to the (sorted, deduplicated) RRefs chosen for it.
///
/// Two contexts are equal when every DRef is bound to the same set of RRefs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<DRef, Vec<RRef>>);

impl Context {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bind `dref` to `rrefs`. Rebinding to the same set is a no-op; rebinding
  /// to a different set is a [`Error::ContextInconsistency`].
  pub fn bind(&mut self, dref: DRef, rrefs: Vec<RRef>) -> Result<()> {
    let rrefs = normalize(rrefs);
    if let Some(existing) = self.0.get(&dref) {
      if *existing == rrefs {
        return Ok(());
      }
      return Err(Error::ContextInconsistency {
        dref,
        existing: existing.clone(),
        requested: rrefs,
      });
    }
    self.0.insert(dref, rrefs);
    Ok(())
  }

  pub fn get(&self, dref: &DRef) -> Option<&[RRef]> {
    self.0.get(dref).map(Vec::as_slice)
  }

  /// Like [`Context::get`], but a missing binding is an error.
  pub fn deref(&self, dref: &DRef) -> Result<&[RRef]> {
    self.get(dref).ok_or_else(|| Error::MissingDependency { dref: dref.clone() })
  }

  pub fn contains(&self, dref: &DRef) -> bool {
    self.0.contains_key(dref)
  }

  /// A copy holding only the bindings for `keep`.
  pub fn restrict(&self, keep: &BTreeSet<DRef>) -> Self {
    Self(
      self
        .0
        .iter()
        .filter(|(dref, _)| keep.contains(*dref))
        .map(|(dref, rrefs)| (dref.clone(), rrefs.clone()))
        .collect(),
    )
  }

  pub fn drefs(&self) -> impl Iterator<Item = &DRef> {
    self.0.keys()
  }

  /// Every RRef in the context, across all bindings.
  pub fn rrefs(&self) -> impl Iterator<Item = &RRef> {
    self.0.values().flatten()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&DRef, &[RRef])> {
    self.0.iter().map(|(d, r)| (d, r.as_slice()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Canonical JSON form, as written to `context.json`.
  pub fn to_json(&self) -> String {
    // DRef keys serialize as strings, so this cannot fail.
    serde_json::to_string(&self.0).unwrap_or_default()
  }
}

fn normalize(mut rrefs: Vec<RRef>) -> Vec<RRef> {
  rrefs.sort();
  rrefs.dedup();
  rrefs
}
