//! Helper for writing realizers.
//!
//! [`Build`] allocates staging output directories, stamps the build start
//! time, and resolves references from the config to paths on disk.
//! [`build_wrapper`] turns a function over a `Build` into a [`Realizer`].

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use super::{OutputGroup, RealizeRequest, Realizer};
use crate::config::{Config, ConfigError};
use crate::consts::{BUILDTIME_FILENAME, CLAIM_MARKER, DREF_PREFIX, PROMISE_MARKER, RREF_PREFIX};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::refs::{DRef, RRef};
use crate::store::StorageSettings;
use crate::store::query::store_tag;

/// State of one realizer invocation.
#[derive(Debug)]
pub struct Build<'r> {
  request: &'r RealizeRequest,
  outpaths: Vec<PathBuf>,
  started: SystemTime,
}

impl<'r> Build<'r> {
  /// A build with one output directory.
  pub fn new(request: &'r RealizeRequest) -> Result<Self> {
    Self::with_outputs(request, 1)
  }

  /// A build producing `n` groups, each with its own output directory.
  pub fn with_outputs(request: &'r RealizeRequest, n: usize) -> Result<Self> {
    let started = SystemTime::now();
    let stamp = humantime::format_rfc3339_nanos(started).to_string();
    let mut outpaths = Vec::with_capacity(n);
    for _ in 0..n.max(1) {
      let dir = request.make_outdir()?;
      std::fs::write(dir.join(BUILDTIME_FILENAME), &stamp)?;
      outpaths.push(dir);
    }
    Ok(Self {
      request,
      outpaths,
      started,
    })
  }

  pub fn request(&self) -> &'r RealizeRequest {
    self.request
  }

  pub fn settings(&self) -> &'r StorageSettings {
    self.request.settings()
  }

  pub fn dref(&self) -> &'r DRef {
    self.request.dref()
  }

  pub fn config(&self) -> &'r Config {
    self.request.config()
  }

  pub fn context(&self) -> &'r Context {
    self.request.context()
  }

  pub fn arg(&self) -> Option<&'r Value> {
    self.request.arg()
  }

  pub fn started(&self) -> SystemTime {
    self.started
  }

  /// The first output directory.
  pub fn outpath(&self) -> &Path {
    &self.outpaths[0]
  }

  pub fn outpaths(&self) -> &[PathBuf] {
    &self.outpaths
  }

  /// Paths of the `out` realizations `dep` resolved to.
  pub fn deref(&self, dep: &DRef) -> Result<Vec<PathBuf>> {
    let settings = self.settings();
    let mut paths = Vec::new();
    for rref in self.context().deref(dep)? {
      if store_tag(settings, rref)?.is_default() {
        paths.push(settings.rref_path(rref));
      }
    }
    Ok(paths)
  }

  /// Path of the single `out` realization `dep` resolved to.
  pub fn deref_one(&self, dep: &DRef) -> Result<PathBuf> {
    let mut paths = self.deref(dep)?;
    match paths.len() {
      1 => Ok(paths.remove(0)),
      count => Err(Error::NotSingular {
        dref: dep.clone(),
        count,
      }),
    }
  }

  /// Resolve a config value to a path.
  ///
  /// Accepts DRef and RRef strings, reference paths `[dref, segments...]`,
  /// and promises/claims, which resolve inside this build's output.
  pub fn resolve(&self, value: &Value) -> Result<PathBuf> {
    let unresolvable = || Error::Unresolvable {
      value: value.to_string(),
    };
    match value {
      Value::String(s) if s.starts_with(DREF_PREFIX) => self.deref_one(&DRef::parse(s)?),
      Value::String(s) if s.starts_with(RREF_PREFIX) => Ok(self.settings().rref_path(&RRef::parse(s)?)),
      Value::Array(items) => {
        let (head, rest) = items.split_first().ok_or_else(unresolvable)?;
        let head = head.as_str().ok_or_else(unresolvable)?;
        let base = if head == PROMISE_MARKER || head == CLAIM_MARKER {
          self.outpath().to_path_buf()
        } else if head.starts_with(DREF_PREFIX) || head.starts_with(RREF_PREFIX) {
          self.resolve(&Value::String(head.to_string()))?
        } else {
          return Err(unresolvable());
        };
        rest.iter().try_fold(base, |path, seg| {
          seg.as_str().map(|s| path.join(s)).ok_or_else(unresolvable)
        })
      }
      _ => Err(unresolvable()),
    }
  }

  /// Resolve the config field `key` to a path.
  pub fn path_of(&self, key: &str) -> Result<PathBuf> {
    let value = self
      .config()
      .get(key)
      .ok_or_else(|| ConfigError::Missing { key: key.to_string() })?;
    self.resolve(value)
  }

  /// One single-member group per output directory.
  pub fn into_outputs(self) -> Vec<OutputGroup> {
    self.outpaths.into_iter().map(OutputGroup::single).collect()
  }
}

/// Realizer adapter around a function that fills a [`Build`].
pub struct BuildWrapper<F> {
  outputs: usize,
  f: F,
}

impl<F> Realizer for BuildWrapper<F>
where
  F: Fn(&mut Build<'_>) -> anyhow::Result<()> + Send + Sync,
{
  fn realize(&self, request: &RealizeRequest) -> anyhow::Result<Vec<OutputGroup>> {
    let mut build = Build::with_outputs(request, self.outputs)?;
    (self.f)(&mut build)?;
    Ok(build.into_outputs())
  }
}

/// A realizer producing one output group.
pub fn build_wrapper<F>(f: F) -> BuildWrapper<F>
where
  F: Fn(&mut Build<'_>) -> anyhow::Result<()> + Send + Sync,
{
  build_wrapper_n(1, f)
}

/// A realizer producing `n` output groups.
pub fn build_wrapper_n<F>(n: usize, f: F) -> BuildWrapper<F>
where
  F: Fn(&mut Build<'_>) -> anyhow::Result<()> + Send + Sync,
{
  BuildWrapper { outputs: n, f }
}
