//! Errors raised by instantiation, realization, matching and collection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::recursion::Frame;
use crate::refs::{DRef, RRef, RefError};
use crate::store::StoreError;

/// Errors that can occur while working with a store.
#[derive(Debug, Error)]
pub enum Error {
  /// A DRef/RRef/tag string is malformed.
  #[error(transparent)]
  InvalidReference(#[from] RefError),

  #[error("invalid config: {0}")]
  InvalidConfig(#[from] ConfigError),

  /// A config embeds a reference whose dependencies cannot be known before realization.
  #[error("{dref} references {reference}, which is neither bound in this registry nor realized in the store")]
  ForeignReference { dref: DRef, reference: String },

  /// Nested instantiate/realize on one thread.
  #[error("cannot start {attempted} while {active} is active on this thread")]
  Recursion { attempted: Frame, active: Frame },

  /// One derivation resolved to two different selections within one pass.
  #[error("{dref} already resolved to {existing:?}, cannot rebind to {requested:?}")]
  ContextInconsistency {
    dref: DRef,
    existing: Vec<RRef>,
    requested: Vec<RRef>,
  },

  /// A promised output path is missing from a selected realization.
  #[error("{rref} broke a promise: '{path}' does not exist")]
  BrokenPromise { rref: RRef, path: PathBuf },

  /// The realizer failed. Staging directories are left in place for inspection.
  #[error("failed to realize {dref}: {source}")]
  Build {
    dref: DRef,
    staging: Vec<PathBuf>,
    #[source]
    source: anyhow::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  /// A strict matcher found several candidate groups.
  #[error("matcher for {dref} expects at most one realization, found {count}")]
  AmbiguousMatch { dref: DRef, count: usize },

  /// After a build the matcher still selected nothing.
  #[error("matcher for {dref} rejected the output its realizer just produced")]
  MatcherRejectedOutput { dref: DRef },

  #[error("expected exactly one realization group for {dref}, found {count}")]
  NotSingular { dref: DRef, count: usize },

  #[error("closure has {count} targets, expected exactly one")]
  MultipleTargets { count: usize },

  #[error("realizer for {dref} returned no outputs")]
  NoOutputs { dref: DRef },

  #[error("output group for {dref} has no '{tag}' member")]
  MissingDefaultTag { dref: DRef, tag: String },

  #[error("realizer output '{path}' is not a directory")]
  InvalidOutput { path: PathBuf },

  /// Realizer output collides with store metadata.
  #[error("realizer output '{path}' contains reserved name '{name}'")]
  ReservedName { path: PathBuf, name: String },

  /// A strict registry was asked to rebind an existing derivation.
  #[error("{dref} is already bound in this registry")]
  Rebind { dref: DRef },

  #[error("dependency cycle detected at {0}")]
  Cycle(DRef),

  #[error("{dref} is not bound in the context")]
  MissingDependency { dref: DRef },

  #[error("cannot resolve {value} to a path")]
  Unresolvable { value: String },

  #[error("garbage collection requires an exclusive store lock")]
  SharedLock,

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
