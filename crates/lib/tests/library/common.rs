//! Shared helpers for library integration tests.

use std::fs;

use lightstore_lib::platform::immutable::make_mutable;
use lightstore_lib::{Build, Config, RRef, Realizer, StorageSettings, build_wrapper};
use serde_json::Value;
use tempfile::TempDir;

/// Isolated store in a temporary directory.
pub struct TestEnv {
  pub settings: StorageSettings,
  temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let settings = StorageSettings::new(temp.path());
    Self { settings, temp }
  }

  /// Write a file outside the store, returning its path.
  pub fn write_file(&self, relative_path: &str, content: &[u8]) -> std::path::PathBuf {
    let path = self.temp.path().join("files").join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
  }
}

impl Drop for TestEnv {
  fn drop(&mut self) {
    // Published entries are read-only.
    let _ = make_mutable(self.temp.path());
  }
}

pub fn cfg(value: Value) -> Config {
  Config::from_value(value).unwrap()
}

/// A realizer writing `out.txt` with the config's `text` field, or the
/// realize argument when one is given.
pub fn write_text() -> impl Realizer + 'static {
  build_wrapper(|b: &mut Build<'_>| {
    let text = match b.arg() {
      Some(arg) => arg.to_string(),
      None => b.config().get_str("text").unwrap_or_default().to_string(),
    };
    fs::write(b.outpath().join("out.txt"), text)?;
    Ok(())
  })
}

pub fn read_out(settings: &StorageSettings, rref: &RRef) -> String {
  fs::read_to_string(settings.rref_path(rref).join("out.txt")).unwrap()
}
