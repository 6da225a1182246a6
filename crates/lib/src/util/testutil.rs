//! Test helpers for lightstore-lib unit tests.

use std::path::Path;

use tempfile::TempDir;

use crate::platform::immutable::make_mutable;
use crate::store::StorageSettings;

/// Store settings rooted in a temporary directory.
///
/// Published realizations are read-only; dropping restores write access so
/// the directory can be removed.
pub struct TestStore {
  pub settings: StorageSettings,
  temp: TempDir,
}

impl TestStore {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let settings = StorageSettings::new(temp.path());
    settings.init().unwrap();
    Self { settings, temp }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }
}

impl Drop for TestStore {
  fn drop(&mut self) {
    let _ = make_mutable(self.temp.path());
  }
}
