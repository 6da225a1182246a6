//! Content hashing for realization outputs.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::consts::{CONTEXT_FILENAME, GROUPS_FILENAME};

/// A full 64-character SHA-256, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("cannot walk {root}: {source}")]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("cannot read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Entries the store writes or reserves inside an output.
///
/// `_`-prefixed names are skipped at any depth; `context.json` and
/// `groups.json` only at the top of the tree.
fn is_metadata(entry: &DirEntry) -> bool {
  let depth = entry.depth();
  if depth == 0 {
    return false;
  }
  let name = entry.file_name().to_string_lossy();
  name.starts_with('_') || (depth == 1 && (name == CONTEXT_FILENAME || name == GROUPS_FILENAME))
}

/// Deterministic hash of an output tree.
///
/// Each entry contributes one line `<kind>:<relative path>[:<sha256>]`
/// (`F` file contents, `L` symlink target, `D` directory), in path order.
/// Timestamps and permissions never participate.
pub fn hash_directory(root: &Path) -> Result<ContentHash, DirHashError> {
  let mut lines: Vec<String> = Vec::new();

  let walker = WalkDir::new(root).into_iter().filter_entry(|e| !is_metadata(e));
  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      root: root.to_path_buf(),
      source,
    })?;
    if entry.depth() == 0 {
      continue;
    }

    let path = entry.path();
    let rel = path
      .strip_prefix(root)
      .unwrap_or(path)
      .to_string_lossy()
      .replace('\\', "/");
    let kind = entry.file_type();
    if kind.is_dir() {
      lines.push(format!("D:{}", rel));
    } else if kind.is_file() {
      lines.push(format!("F:{}:{}", rel, hash_file(path)?));
    } else if kind.is_symlink() {
      let target = fs::read_link(path).map_err(|source| DirHashError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      lines.push(format!("L:{}:{}", rel, hash_bytes(target.to_string_lossy().as_bytes())));
    }
  }

  // Sort on the full line so the order does not depend on the walker.
  lines.sort();
  let mut hasher = Sha256::new();
  for line in &lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}
