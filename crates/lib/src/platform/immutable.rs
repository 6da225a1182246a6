//! Write protection for published store entries.
//!
//! On Unix a protected file is 0444 (0555 when executable) and a protected
//! directory 0555. Windows has no directory write bit that matters, so only
//! files get the read-only attribute there.
//!
//! Store metadata at the top of a realization (`_`-prefixed names,
//! `context.json`, `groups.json`) is never protected.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::is_reserved_name;

#[derive(Debug, thiserror::Error)]
pub enum ImmutableError {
  #[error("cannot change permissions of {path}: {source}")]
  Permissions {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot walk {root}: {source}")]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
  ReadOnly,
  Writable,
}

/// Write-protect a published realization.
///
/// Entries whose permissions cannot be changed are logged and skipped.
pub fn make_immutable(root: &Path) -> Result<(), ImmutableError> {
  if !root.exists() {
    return Ok(());
  }
  debug!(path = %root.display(), "protecting store entry");

  // Children first: a read-only directory could not be entered afterwards.
  let entries = WalkDir::new(root)
    .contents_first(true)
    .into_iter()
    .filter_entry(|e| e.depth() != 1 || !e.file_name().to_str().is_some_and(is_reserved_name));
  walk(root, entries, Protection::ReadOnly)
}

/// Write-protect one file, such as a stored `config.json`.
pub fn make_file_readonly(path: &Path) -> Result<(), ImmutableError> {
  protect(path, Protection::ReadOnly)
}

/// Undo [`make_immutable`] so the tree can be deleted.
pub fn make_mutable(root: &Path) -> Result<(), ImmutableError> {
  if !root.exists() {
    return Ok(());
  }
  debug!(path = %root.display(), "unprotecting store entry");

  // Parents first, so their children can be reached.
  walk(root, WalkDir::new(root).into_iter(), Protection::Writable)
}

fn walk<I>(root: &Path, entries: I, protection: Protection) -> Result<(), ImmutableError>
where
  I: Iterator<Item = walkdir::Result<walkdir::DirEntry>>,
{
  for entry in entries {
    let entry = entry.map_err(|source| ImmutableError::Walk {
      root: root.to_path_buf(),
      source,
    })?;
    if entry.path_is_symlink() {
      continue;
    }
    if let Err(e) = protect(entry.path(), protection) {
      warn!(path = %entry.path().display(), error = %e, ?protection, "skipping entry");
    }
  }
  Ok(())
}

fn protect(path: &Path, protection: Protection) -> Result<(), ImmutableError> {
  let failed = |source| ImmutableError::Permissions {
    path: path.to_path_buf(),
    source,
  };
  let meta = fs::metadata(path).map_err(failed)?;
  match permissions_for(&meta, protection) {
    Some(perms) => fs::set_permissions(path, perms).map_err(failed),
    None => Ok(()),
  }
}

#[cfg(unix)]
fn permissions_for(meta: &fs::Metadata, protection: Protection) -> Option<fs::Permissions> {
  use std::os::unix::fs::PermissionsExt;

  let executable = meta.is_dir() || meta.permissions().mode() & 0o111 != 0;
  let mode = match (protection, executable) {
    (Protection::ReadOnly, true) => 0o555,
    (Protection::ReadOnly, false) => 0o444,
    (Protection::Writable, true) => 0o755,
    (Protection::Writable, false) => 0o644,
  };
  Some(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn permissions_for(meta: &fs::Metadata, protection: Protection) -> Option<fs::Permissions> {
  if meta.is_dir() {
    return None;
  }
  let mut perms = meta.permissions();
  #[allow(clippy::permissions_set_readonly_false)]
  perms.set_readonly(protection == Protection::ReadOnly);
  Some(perms)
}
