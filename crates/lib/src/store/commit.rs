//! Atomic publication of store entries.
//!
//! Every entry is assembled in a staging directory under `tmp/` and moved
//! into place with a single rename. A rename that loses a race against
//! another writer is not an error: content addressing means the entry that
//! won is equivalent, so the staging copy is dropped.

use std::fs;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{StorageSettings, StoreError};
use crate::config::Config;
use crate::consts::{CONFIG_FILENAME, CONTEXT_FILENAME, REF_HASH_LEN};
use crate::context::Context;
use crate::platform::immutable::{make_file_readonly, make_immutable, make_mutable};
use crate::refs::{DRef, RRef, Tag};
use crate::util::hash::ContentHash;

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Committed {
  /// The staging directory became the entry.
  New,
  /// An equivalent entry was already present; the staging copy was discarded.
  Existing,
}

/// Rename `staging` to `target`.
pub fn commit_dir(staging: &Path, target: &Path) -> Result<Committed, StoreError> {
  if target.exists() {
    discard_staging(staging);
    return Ok(Committed::Existing);
  }

  match fs::rename(staging, target) {
    Ok(()) => Ok(Committed::New),
    Err(_) if target.exists() => {
      debug!(target = ?target, "lost commit race, keeping existing entry");
      discard_staging(staging);
      Ok(Committed::Existing)
    }
    Err(source) => Err(StoreError::Commit {
      staging: staging.to_path_buf(),
      target: target.to_path_buf(),
      source,
    }),
  }
}

/// Best-effort removal of a staging directory.
pub fn discard_staging(staging: &Path) {
  let _ = make_mutable(staging);
  if let Err(e) = fs::remove_dir_all(staging) {
    warn!(path = ?staging, error = %e, "failed to remove staging directory");
  }
}

/// Write `value` as JSON to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  let content = serde_json::to_string(value).map_err(|source| StoreError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  fs::write(path, content).map_err(|source| StoreError::Write {
    path: path.to_path_buf(),
    source,
  })
}

/// Ensure `<store>/<dhash>-<name>/config.json` exists for `config`.
///
/// The config file is write-protected; the derivation directory is not,
/// since realizations are renamed into it later.
pub fn commit_config(settings: &StorageSettings, config: &Config) -> Result<(DRef, Committed), StoreError> {
  let dref = config.dref();
  let target = settings.dref_path(&dref);
  if target.join(CONFIG_FILENAME).exists() {
    return Ok((dref, Committed::Existing));
  }

  let staging = settings.make_staging_dir("dref-")?;
  let config_path = staging.join(CONFIG_FILENAME);
  fs::write(&config_path, config.canonical()).map_err(|source| StoreError::Write {
    path: config_path.clone(),
    source,
  })?;
  make_file_readonly(&config_path)?;

  let committed = commit_dir(&staging, &target)?;
  if committed == Committed::New {
    debug!(dref = %dref, "committed config");
  }
  Ok((dref, committed))
}

/// Write `context.json` into a staging output.
pub fn write_context(staging: &Path, context: &Context) -> Result<(), StoreError> {
  let path = staging.join(CONTEXT_FILENAME);
  fs::write(&path, context.to_json()).map_err(|source| StoreError::Write { path, source })
}

/// RRef for an output: the content hash mixed with its context and tag, so
/// identical bytes built against different dependencies stay distinct.
pub fn output_rref(dref: &DRef, content: &ContentHash, context: &Context, tag: &Tag) -> RRef {
  let mut hasher = Sha256::new();
  hasher.update(content.0.as_bytes());
  hasher.update(b"\n");
  hasher.update(context.to_json().as_bytes());
  hasher.update(b"\n");
  hasher.update(tag.as_str().as_bytes());
  let digest = hex::encode(hasher.finalize());
  RRef::from_parts(digest[..REF_HASH_LEN].to_string(), dref.clone())
}

/// Move a fully prepared output into `<dref dir>/<rhash>` and write-protect it.
pub fn publish_realization(settings: &StorageSettings, staging: &Path, rref: &RRef) -> Result<Committed, StoreError> {
  let target = settings.rref_path(rref);
  let committed = commit_dir(staging, &target)?;
  if committed == Committed::New {
    make_immutable(&target)?;
  }
  Ok(committed)
}
