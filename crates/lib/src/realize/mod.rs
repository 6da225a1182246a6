//! Realization: walking a closure and producing or reusing outputs.
//!
//! Derivations are visited in dependency order. For each one the matcher
//! first looks at what is already in the store; only when it selects
//! nothing is the realizer invoked, its output groups committed, and the
//! matcher asked again.

pub mod build;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::consts::{BUILDTIME_FILENAME, CONTEXT_FILENAME, GROUPS_FILENAME};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::graph::{Closure, Derivation};
use crate::group::{Group, GroupMeta, group_id, groups_of};
use crate::matcher::check_promises;
use crate::recursion::{Frame, enter};
use crate::refs::{DRef, RRef, Tag};
use crate::store::StorageSettings;
use crate::store::StoreError;
use crate::store::commit::{Committed, output_rref, publish_realization, write_context, write_json};
use crate::store::query::store_config;
use crate::util::hash::hash_directory;

/// Everything a realizer is given for one invocation.
#[derive(Debug)]
pub struct RealizeRequest {
  settings: StorageSettings,
  dref: DRef,
  config: Config,
  context: Context,
  arg: Option<Value>,
  staging: Mutex<Vec<PathBuf>>,
}

impl RealizeRequest {
  pub fn new(settings: StorageSettings, dref: DRef, config: Config, context: Context, arg: Option<Value>) -> Self {
    Self {
      settings,
      dref,
      config,
      context,
      arg,
      staging: Mutex::new(Vec::new()),
    }
  }

  pub fn settings(&self) -> &StorageSettings {
    &self.settings
  }

  pub fn dref(&self) -> &DRef {
    &self.dref
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Resolved dependencies, restricted to what this derivation depends on.
  pub fn context(&self) -> &Context {
    &self.context
  }

  /// Value passed for this derivation through [`RealizeOptions::arg`].
  pub fn arg(&self) -> Option<&Value> {
    self.arg.as_ref()
  }

  /// A fresh staging directory for one output. It is tracked so that a
  /// failed build can report where its partial output was left.
  pub fn make_outdir(&self) -> Result<PathBuf, StoreError> {
    let dir = self.settings.make_staging_dir(&format!("{}-", self.dref.name()))?;
    self.staging.lock().unwrap_or_else(|e| e.into_inner()).push(dir.clone());
    Ok(dir)
  }

  pub fn staging_dirs(&self) -> Vec<PathBuf> {
    self.staging.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

/// Produces output directories for a derivation.
pub trait Realizer: Send + Sync {
  fn realize(&self, request: &RealizeRequest) -> anyhow::Result<Vec<OutputGroup>>;
}

impl<F> Realizer for F
where
  F: Fn(&RealizeRequest) -> anyhow::Result<Vec<OutputGroup>> + Send + Sync,
{
  fn realize(&self, request: &RealizeRequest) -> anyhow::Result<Vec<OutputGroup>> {
    self(request)
  }
}

/// Staging directories of one output group, by tag. Must contain `out`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputGroup(BTreeMap<Tag, PathBuf>);

impl OutputGroup {
  /// A group with a single `out` member.
  pub fn single(path: impl Into<PathBuf>) -> Self {
    Self(BTreeMap::from([(Tag::out(), path.into())]))
  }

  pub fn with(mut self, tag: Tag, path: impl Into<PathBuf>) -> Self {
    self.0.insert(tag, path.into());
    self
  }

  pub fn get(&self, tag: &Tag) -> Option<&Path> {
    self.0.get(tag).map(PathBuf::as_path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Tag, &Path)> {
    self.0.iter().map(|(t, p)| (t, p.as_path()))
  }
}

impl From<PathBuf> for OutputGroup {
  fn from(path: PathBuf) -> Self {
    Self::single(path)
  }
}

/// Per-call realization options.
#[derive(Debug, Clone, Default)]
pub struct RealizeOptions {
  /// Skip the cache for these derivations and always run their realizers.
  pub force_rebuild: BTreeSet<DRef>,
  /// Values handed to the realizers of these derivations.
  pub args: BTreeMap<DRef, Value>,
}

impl RealizeOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn force(mut self, dref: &DRef) -> Self {
    self.force_rebuild.insert(dref.clone());
    self
  }

  pub fn arg(mut self, dref: &DRef, value: impl Into<Value>) -> Self {
    self.args.insert(dref.clone(), value.into());
    self
  }
}

/// Realize the single target, which must resolve to exactly one group.
/// Returns that group's `out` RRef.
pub fn realize(closure: &Closure, options: &RealizeOptions) -> Result<RRef> {
  let target = closure.target()?.clone();
  let groups = realize_groups(closure, options)?;
  match groups.as_slice() {
    [group] => Ok(group.out().clone()),
    other => Err(Error::NotSingular {
      dref: target,
      count: other.len(),
    }),
  }
}

/// The `out` RRef of every group the single target resolved to.
pub fn realize_many(closure: &Closure, options: &RealizeOptions) -> Result<Vec<RRef>> {
  Ok(realize_groups(closure, options)?.iter().map(|g| g.out().clone()).collect())
}

/// Every group the single target resolved to.
pub fn realize_groups(closure: &Closure, options: &RealizeOptions) -> Result<Vec<Group>> {
  let target = closure.target()?;
  let context = realize_all(closure, options)?;
  groups_of(closure.settings(), context.deref(target)?)
}

/// Realize every derivation in the closure and return the resulting context.
pub fn realize_all(closure: &Closure, options: &RealizeOptions) -> Result<Context> {
  let _guard = enter(Frame::Realize)?;
  let settings = closure.settings();
  settings.init()?;

  let mut context = Context::new();
  for derivation in closure.derivations() {
    let local = context.restrict(&closure.deep_deps(&derivation.dref));
    let selection = realize_one(settings, derivation, &local, options)?;
    context.bind(derivation.dref.clone(), selection)?;
  }
  Ok(context)
}

fn realize_one(
  settings: &StorageSettings,
  derivation: &Derivation,
  context: &Context,
  options: &RealizeOptions,
) -> Result<Vec<RRef>> {
  let dref = &derivation.dref;
  let config = store_config(settings, dref)?;

  if options.force_rebuild.contains(dref) {
    debug!(dref = %dref, "rebuild forced");
  } else if let Some(selection) = checked_match(settings, derivation, &config, context)? {
    debug!(dref = %dref, selected = selection.len(), "reusing realizations");
    return Ok(selection);
  }

  info!(dref = %dref, "realizing");
  let request = RealizeRequest::new(
    settings.clone(),
    dref.clone(),
    config.clone(),
    context.clone(),
    options.args.get(dref).cloned(),
  );
  let groups = derivation.realizer.realize(&request).map_err(|source| Error::Build {
    dref: dref.clone(),
    staging: request.staging_dirs(),
    source,
  })?;
  if groups.is_empty() {
    return Err(Error::NoOutputs { dref: dref.clone() });
  }

  for group in groups {
    commit_group(settings, dref, context, group)?;
  }

  match checked_match(settings, derivation, &config, context)? {
    Some(selection) if !selection.is_empty() => Ok(selection),
    _ => Err(Error::MatcherRejectedOutput { dref: dref.clone() }),
  }
}

fn checked_match(
  settings: &StorageSettings,
  derivation: &Derivation,
  config: &Config,
  context: &Context,
) -> Result<Option<Vec<RRef>>> {
  let selection = derivation.matcher.matches(settings, &derivation.dref, context)?;
  if let Some(selection) = &selection {
    check_promises(settings, config, selection)?;
  }
  Ok(selection)
}

/// Publish every member of `group` and return the resulting group.
pub(crate) fn commit_group(
  settings: &StorageSettings,
  dref: &DRef,
  context: &Context,
  group: OutputGroup,
) -> Result<Group> {
  if group.get(&Tag::out()).is_none() {
    return Err(Error::MissingDefaultTag {
      dref: dref.clone(),
      tag: Tag::out().to_string(),
    });
  }

  // Outputs not made through `Build` get their stamp at commit time.
  let stamp = humantime::format_rfc3339_nanos(SystemTime::now()).to_string();

  let mut members: BTreeMap<Tag, (RRef, PathBuf)> = BTreeMap::new();
  for (tag, path) in group.iter() {
    if !path.is_dir() {
      return Err(Error::InvalidOutput { path: path.to_path_buf() });
    }
    for reserved in [CONTEXT_FILENAME, GROUPS_FILENAME] {
      if path.join(reserved).exists() {
        return Err(Error::ReservedName {
          path: path.to_path_buf(),
          name: reserved.to_string(),
        });
      }
    }
    let buildtime = path.join(BUILDTIME_FILENAME);
    if !buildtime.exists() {
      std::fs::write(&buildtime, &stamp).map_err(|source| StoreError::Write { path: buildtime, source })?;
    }
    write_context(path, context)?;
    let content = hash_directory(path).map_err(StoreError::from)?;
    let rref = output_rref(dref, &content, context, tag);
    members.insert(tag.clone(), (rref, path.to_path_buf()));
  }

  let rrefs: BTreeMap<Tag, RRef> = members.iter().map(|(t, (r, _))| (t.clone(), r.clone())).collect();
  let id = group_id(&rrefs);

  for (tag, (rref, path)) in &members {
    let meta = GroupMeta {
      tag: tag.clone(),
      group: id.clone(),
    };
    write_json(&path.join(GROUPS_FILENAME), &meta)?;
    match publish_realization(settings, path, rref)? {
      Committed::New => info!(rref = %rref, "realized"),
      Committed::Existing => debug!(rref = %rref, "identical realization already present"),
    }
  }

  Group::new(rrefs).ok_or_else(|| Error::MissingDefaultTag {
    dref: dref.clone(),
    tag: Tag::out().to_string(),
  })
}
