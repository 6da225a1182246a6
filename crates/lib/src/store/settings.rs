//! Where the store lives.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::StoreError;
use crate::consts::{CONFIG_FILENAME, ROOT_ENV, STORE_ENV, TMP_ENV};
use crate::platform::paths::data_dir;
use crate::refs::{DRef, RRef};

/// Locations of the store and its staging area.
///
/// Built once and passed to every operation; nothing reads the environment
/// after construction. `tmp` must be on the same filesystem as `store` so
/// that commits are atomic renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
  root: PathBuf,
  store: PathBuf,
  tmp: PathBuf,
}

impl StorageSettings {
  /// `<root>/store` and `<root>/tmp`.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    Self {
      store: root.join("store"),
      tmp: root.join("tmp"),
      root,
    }
  }

  /// Resolve from `LIGHTSTORE_ROOT` (default: the user data directory), with
  /// `LIGHTSTORE_STORE` and `LIGHTSTORE_TMP` overriding the parts.
  pub fn from_env() -> Result<Self, StoreError> {
    let root = match std::env::var_os(ROOT_ENV) {
      Some(root) if !root.is_empty() => PathBuf::from(root),
      _ => data_dir().ok_or(StoreError::NoRoot)?,
    };
    let mut settings = Self::new(root);
    if let Some(store) = std::env::var_os(STORE_ENV).filter(|s| !s.is_empty()) {
      settings = settings.with_store(store);
    }
    if let Some(tmp) = std::env::var_os(TMP_ENV).filter(|s| !s.is_empty()) {
      settings = settings.with_tmp(tmp);
    }
    Ok(settings)
  }

  pub fn with_store(mut self, store: impl Into<PathBuf>) -> Self {
    self.store = store.into();
    self
  }

  pub fn with_tmp(mut self, tmp: impl Into<PathBuf>) -> Self {
    self.tmp = tmp.into();
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn store(&self) -> &Path {
    &self.store
  }

  pub fn tmp(&self) -> &Path {
    &self.tmp
  }

  /// Create the store and staging directories if missing.
  pub fn init(&self) -> Result<(), StoreError> {
    for dir in [&self.store, &self.tmp] {
      fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
        path: dir.clone(),
        source,
      })?;
    }
    debug!(store = ?self.store, tmp = ?self.tmp, "store initialized");
    Ok(())
  }

  /// Create a fresh staging directory under `tmp`. It is not removed on drop.
  pub fn make_staging_dir(&self, prefix: &str) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(&self.tmp).map_err(|source| StoreError::CreateDir {
      path: self.tmp.clone(),
      source,
    })?;
    let dir = tempfile::Builder::new()
      .prefix(prefix)
      .tempdir_in(&self.tmp)
      .map_err(|source| StoreError::CreateDir {
        path: self.tmp.clone(),
        source,
      })?;
    Ok(dir.keep())
  }

  pub fn dref_path(&self, dref: &DRef) -> PathBuf {
    self.store.join(dref.dir_name())
  }

  pub fn config_path(&self, dref: &DRef) -> PathBuf {
    self.dref_path(dref).join(CONFIG_FILENAME)
  }

  pub fn rref_path(&self, rref: &RRef) -> PathBuf {
    self.dref_path(rref.dref()).join(rref.dir_name())
  }
}
