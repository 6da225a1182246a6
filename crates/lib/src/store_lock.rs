//! Advisory lock on the store directory.
//!
//! Builds never lock: they rely on atomic commits. A GC sweep takes the lock
//! exclusively so two sweeps cannot interleave; readers that must not race a
//! sweep take it shared. The exclusive holder records who it is in the lock
//! file so contention errors can name it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::LOCK_FILENAME;
use crate::store::StorageSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

impl fmt::Display for LockMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockMode::Shared => write!(f, "shared"),
      LockMode::Exclusive => write!(f, "exclusive"),
    }
  }
}

/// Who holds the exclusive lock. Stored as JSON in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  /// RFC 3339 time the lock was taken.
  pub since: String,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store is locked by '{}' (pid {}, since {})\nif no lightstore process is running, remove {lock_path}",
    .holder.command,
    .holder.pid,
    .holder.since
  )]
  Held { holder: LockHolder, lock_path: PathBuf },

  #[error("store is locked by another process\nif no lightstore process is running, remove {lock_path}")]
  HeldUnknown { lock_path: PathBuf },

  #[error("cannot create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot open lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot take {mode} lock on {path}: {source}")]
  Lock {
    mode: LockMode,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot record lock holder in {path}: {source}")]
  WriteHolder {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held store lock. Released when dropped.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  /// Take the lock without blocking. The store directory is created if
  /// missing.
  pub fn acquire(settings: &StorageSettings, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    let store = settings.store();
    std::fs::create_dir_all(store).map_err(|source| StoreLockError::CreateDir {
      path: store.to_path_buf(),
      source,
    })?;

    let path = store.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(|source| StoreLockError::Open {
        path: path.clone(),
        source,
      })?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(contention(&path)),
      Err(source) => return Err(StoreLockError::Lock { mode, path, source }),
    }

    let mut lock = StoreLock { file, path, mode };
    if mode == LockMode::Exclusive {
      lock.record_holder(command)?;
    }
    debug!(path = %lock.path.display(), mode = %mode, command, "store lock acquired");
    Ok(lock)
  }

  fn record_holder(&mut self, command: &str) -> Result<(), StoreLockError> {
    let holder = LockHolder {
      pid: std::process::id(),
      command: command.to_string(),
      since: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
    };
    let write = |file: &mut File| -> io::Result<()> {
      file.set_len(0)?;
      file.seek(SeekFrom::Start(0))?;
      serde_json::to_writer(&mut *file, &holder).map_err(io::Error::other)?;
      file.flush()
    };
    write(&mut self.file).map_err(|source| StoreLockError::WriteHolder {
      path: self.path.clone(),
      source,
    })
  }

  /// The recorded holder, read through the held handle. Opening the file
  /// again would fail on Windows, where the lock is mandatory.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    serde_json::from_str(&text).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

fn contention(path: &Path) -> StoreLockError {
  let holder = std::fs::read_to_string(path)
    .ok()
    .and_then(|text| serde_json::from_str::<LockHolder>(&text).ok());
  match holder {
    Some(holder) => StoreLockError::Held {
      holder,
      lock_path: path.to_path_buf(),
    },
    None => StoreLockError::HeldUnknown {
      lock_path: path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file.as_fd(), operation).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: the handle is valid for the lifetime of `file` and a zeroed
  // OVERLAPPED is a valid argument.
  let ok = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };
  if ok != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::new(io::ErrorKind::WouldBlock, err))
  } else {
    Err(err)
  }
}
