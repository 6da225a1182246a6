//! The on-disk store.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── store/
//! │   ├── .lock                       # GC lock
//! │   └── <dhash>-<name>/             # one derivation
//! │       ├── config.json             # canonical config (read-only)
//! │       └── <rhash>/                # one realization (read-only)
//! │           ├── context.json
//! │           ├── groups.json
//! │           ├── __buildtime__.txt
//! │           └── ...                 # realizer output
//! └── tmp/                            # staging, same filesystem as store/
//! ```
//!
//! Entries appear only through a directory rename from `tmp/`, so readers see
//! either nothing or a complete entry.

pub mod commit;
pub mod query;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::immutable::ImmutableError;
use crate::util::hash::DirHashError;

pub use commit::{Committed, commit_dir};
pub use query::*;
pub use settings::StorageSettings;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("no store root: set LIGHTSTORE_ROOT or HOME")]
  NoRoot,

  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The final rename failed for a reason other than "destination exists".
  #[error("failed to commit {staging} to {target}: {source}")]
  Commit {
    staging: PathBuf,
    target: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid config at {path}: {source}")]
  Config {
    path: PathBuf,
    #[source]
    source: ConfigError,
  },

  #[error(transparent)]
  DirHash(#[from] DirHashError),

  #[error(transparent)]
  Immutable(#[from] ImmutableError),
}
