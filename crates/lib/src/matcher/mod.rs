//! Matchers decide whether existing realizations satisfy a request.
//!
//! A matcher looks at the groups of a derivation that were built against the
//! current context and answers either `Some(rrefs)` (use these, possibly
//! none at all) or `None` (build). Built-in matchers are [`MatchPolicy`]
//! values composed from sort keys, a top-N cut and a minimum count.

pub mod keys;

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::group::{Group, store_groups};
use crate::refs::{DRef, RRef};
use crate::store::StorageSettings;
use crate::store::query::store_tag;

pub use keys::{KeyValue, SortKey};

pub trait Matcher: Send + Sync {
  fn matches(&self, settings: &StorageSettings, dref: &DRef, context: &Context) -> Result<Option<Vec<RRef>>>;
}

impl<F> Matcher for F
where
  F: Fn(&StorageSettings, &DRef, &Context) -> Result<Option<Vec<RRef>>> + Send + Sync,
{
  fn matches(&self, settings: &StorageSettings, dref: &DRef, context: &Context) -> Result<Option<Vec<RRef>>> {
    self(settings, dref, context)
  }
}

/// A matcher built from keys, a top-N cut and a minimum group count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPolicy {
  keys: Vec<SortKey>,
  min_n: usize,
  top_n: Option<usize>,
  at_most_one: bool,
}

impl MatchPolicy {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn key(mut self, key: SortKey) -> Self {
    self.keys.push(key);
    self
  }

  /// Select nothing (and build) if fewer than `n` groups survive.
  pub fn min(mut self, n: usize) -> Self {
    self.min_n = n;
    self
  }

  /// Keep at most `n` of the best groups.
  pub fn top(mut self, n: usize) -> Self {
    self.top_n = Some(n);
    self
  }

  /// More than one candidate group is an error.
  pub fn at_most_one(mut self) -> Self {
    self.at_most_one = true;
    self
  }

  /// Apply the policy to `groups`, returning the selected groups.
  pub fn select(&self, settings: &StorageSettings, dref: &DRef, groups: Vec<Group>) -> Result<Option<Vec<Group>>> {
    if self.at_most_one && groups.len() > 1 {
      return Err(Error::AmbiguousMatch {
        dref: dref.clone(),
        count: groups.len(),
      });
    }

    let mut keyed: Vec<(Vec<KeyValue>, Group)> = groups
      .into_iter()
      .filter_map(|group| {
        let key = self
          .keys
          .iter()
          .map(|k| k.evaluate(settings, &group))
          .collect::<Option<Vec<_>>>()?;
        Some((key, group))
      })
      .collect();

    // Best first; equal keys fall back to RRef order.
    keyed.sort_by(|(ka, ga), (kb, gb)| kb.cmp(ka).then_with(|| ga.out().cmp(gb.out())));
    if let Some(top) = self.top_n {
      keyed.truncate(top);
    }

    if keyed.len() < self.min_n {
      debug!(dref = %dref, found = keyed.len(), required = self.min_n, "not enough realizations");
      return Ok(None);
    }
    Ok(Some(keyed.into_iter().map(|(_, g)| g).collect()))
  }
}

impl Matcher for MatchPolicy {
  fn matches(&self, settings: &StorageSettings, dref: &DRef, context: &Context) -> Result<Option<Vec<RRef>>> {
    let groups = store_groups(settings, dref, context)?;
    let selected = self.select(settings, dref, groups)?;
    Ok(selected.map(|groups| groups.iter().flat_map(|g| g.rrefs().cloned()).collect()))
  }
}

/// Every existing group, never builds.
pub fn match_all() -> MatchPolicy {
  MatchPolicy::new()
}

/// All groups, building until at least `n` exist.
pub fn match_some(n: usize) -> MatchPolicy {
  MatchPolicy::new().min(n)
}

/// Exactly one group: builds when there is none, fails when there are several.
pub fn match_only() -> MatchPolicy {
  MatchPolicy::new().min(1).top(1).at_most_one()
}

/// The `top` most recently built groups, building until `min` exist.
///
/// Recency is the `__buildtime__.txt` stamp of the `out` member. [`Build`]
/// writes it when the build starts; outputs committed without one are
/// stamped at commit time. Groups whose stamp is missing or unreadable are
/// never selected.
///
/// [`Build`]: crate::realize::build::Build
pub fn match_latest(min: usize, top: usize) -> MatchPolicy {
  MatchPolicy::new().key(SortKey::Latest).min(min).top(top)
}

/// The `top` groups with the highest number in `filename`.
pub fn match_best(filename: &str, min: usize, top: usize) -> MatchPolicy {
  MatchPolicy::new()
    .key(SortKey::Best {
      filename: filename.to_string(),
    })
    .min(min)
    .top(top)
}

/// Exactly the groups whose `out` member is one of `rrefs`.
pub fn match_exact(rrefs: impl IntoIterator<Item = RRef>) -> MatchPolicy {
  let rrefs: BTreeSet<RRef> = rrefs.into_iter().collect();
  let n = rrefs.len();
  MatchPolicy::new().key(SortKey::Exact(rrefs)).min(n)
}

/// Verify every promised path exists under each selected `out` realization.
pub fn check_promises(settings: &StorageSettings, config: &Config, selection: &[RRef]) -> Result<()> {
  let promises = config.promises()?;
  if promises.is_empty() {
    return Ok(());
  }
  for rref in selection {
    if !store_tag(settings, rref)?.is_default() {
      continue;
    }
    let base = settings.rref_path(rref);
    for segments in &promises {
      let path = segments.iter().fold(base.clone(), |p, s| p.join(s));
      if !path.exists() {
        return Err(Error::BrokenPromise {
          rref: rref.clone(),
          path,
        });
      }
    }
  }
  Ok(())
}
