//! Derivation configurations.
//!
//! A [`Config`] is a JSON object with sorted keys. Its canonical form is the
//! compact JSON serialization, which is a fixed point of
//! serialize → parse → serialize; the DRef hash is computed over it.
//!
//! Besides plain JSON values a config may embed:
//! - DRef / RRef strings (dependencies)
//! - reference paths: `["dref:...", "sub", "file"]`
//! - promises `["__promise__", "bin", "tool"]` and claims `["__claim__", ...]`
//!   naming paths inside this derivation's own output

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::{CLAIM_MARKER, DEFAULT_NAME, DREF_PREFIX, PROMISE_MARKER, REF_HASH_LEN, RREF_PREFIX};
use crate::refs::{DRef, RRef, RefError, is_valid_name};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config must be a JSON object")]
  NotAnObject,

  #[error("config name must be a string matching [A-Za-z0-9_-]+, got {0}")]
  InvalidName(String),

  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("missing config field '{key}'")]
  Missing { key: String },

  #[error("config field '{key}' is not a {expected}")]
  WrongType { key: String, expected: &'static str },

  #[error("promise path must be a list of strings: {0}")]
  InvalidPromise(String),
}

/// Full 64-character SHA-256 of a canonical config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigHash(pub String);

impl std::fmt::Display for ConfigHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// References found in a config's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
  pub drefs: BTreeSet<DRef>,
  pub rrefs: BTreeSet<RRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Config(Map<String, Value>);

impl Config {
  pub fn new() -> Self {
    Self(Map::new())
  }

  pub fn builder() -> ConfigBuilder {
    ConfigBuilder::default()
  }

  pub fn from_value(value: Value) -> Result<Self, ConfigError> {
    let Value::Object(map) = value else {
      return Err(ConfigError::NotAnObject);
    };
    if let Some(name) = map.get("name") {
      match name.as_str() {
        Some(s) if is_valid_name(s) => {}
        _ => return Err(ConfigError::InvalidName(name.to_string())),
      }
    }
    Ok(Self(map))
  }

  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let value: Value = serde_json::from_str(text)?;
    Self::from_value(value)
  }

  /// Compact JSON with sorted keys.
  pub fn canonical(&self) -> String {
    canonical_json(&self.0)
  }

  pub fn compute_hash(&self) -> ConfigHash {
    ConfigHash(sha256_hex(self.canonical().as_bytes()))
  }

  /// Hash of the config with top-level `_`-prefixed keys removed.
  pub fn weak_hash(&self) -> ConfigHash {
    let public: Map<String, Value> = self
      .0
      .iter()
      .filter(|(k, _)| !k.starts_with('_'))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    ConfigHash(sha256_hex(canonical_json(&public).as_bytes()))
  }

  pub fn name(&self) -> &str {
    self.get_str("name").unwrap_or(DEFAULT_NAME)
  }

  pub fn dref(&self) -> DRef {
    let hash = self.compute_hash();
    DRef::from_parts(hash.0[..REF_HASH_LEN].to_string(), self.name().to_string())
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.0.get(key).and_then(Value::as_str)
  }

  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.0.get(key).and_then(Value::as_i64)
  }

  pub fn get_f64(&self, key: &str) -> Option<f64> {
    self.0.get(key).and_then(Value::as_f64)
  }

  pub fn get_bool(&self, key: &str) -> Option<bool> {
    self.0.get(key).and_then(Value::as_bool)
  }

  pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
    match self.0.get(key) {
      None => Err(ConfigError::Missing { key: key.to_string() }),
      Some(v) => v.as_str().ok_or_else(|| ConfigError::WrongType {
        key: key.to_string(),
        expected: "string",
      }),
    }
  }

  /// Scan all values for embedded DRef and RRef strings.
  pub fn references(&self) -> Result<References, RefError> {
    let mut refs = References::default();
    for value in self.0.values() {
      collect_references(value, &mut refs)?;
    }
    Ok(refs)
  }

  /// Relative path segments of every promise in this config.
  pub fn promises(&self) -> Result<Vec<Vec<String>>, ConfigError> {
    self.marked_paths(PROMISE_MARKER)
  }

  /// Relative path segments of every claim in this config.
  pub fn claims(&self) -> Result<Vec<Vec<String>>, ConfigError> {
    self.marked_paths(CLAIM_MARKER)
  }

  fn marked_paths(&self, marker: &str) -> Result<Vec<Vec<String>>, ConfigError> {
    let mut found = Vec::new();
    for value in self.0.values() {
      collect_marked(value, marker, &mut found)?;
    }
    Ok(found)
  }
}

fn canonical_json(map: &Map<String, Value>) -> String {
  // serde_json's Map is ordered by key, so Display output is canonical.
  Value::Object(map.clone()).to_string()
}

fn sha256_hex(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

fn collect_references(value: &Value, refs: &mut References) -> Result<(), RefError> {
  match value {
    Value::String(s) if s.starts_with(DREF_PREFIX) => {
      refs.drefs.insert(DRef::parse(s)?);
    }
    Value::String(s) if s.starts_with(RREF_PREFIX) => {
      refs.rrefs.insert(RRef::parse(s)?);
    }
    Value::Array(items) => {
      for item in items {
        collect_references(item, refs)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_references(item, refs)?;
      }
    }
    _ => {}
  }
  Ok(())
}

fn collect_marked(value: &Value, marker: &str, found: &mut Vec<Vec<String>>) -> Result<(), ConfigError> {
  match value {
    Value::Array(items) if items.first().and_then(Value::as_str) == Some(marker) => {
      let segments = items[1..]
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ConfigError::InvalidPromise(value.to_string()))?;
      found.push(segments);
    }
    Value::Array(items) => {
      for item in items {
        collect_marked(item, marker, found)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_marked(item, marker, found)?;
      }
    }
    _ => {}
  }
  Ok(())
}

/// `["__promise__", segments...]`: a path this derivation's output must contain.
pub fn promise(segments: &[&str]) -> Value {
  marked(PROMISE_MARKER, segments)
}

/// `["__claim__", segments...]`: like a promise but never checked.
pub fn claim(segments: &[&str]) -> Value {
  marked(CLAIM_MARKER, segments)
}

/// `["dref:...", segments...]`: a path inside a dependency's output.
pub fn ref_path(dref: &DRef, segments: &[&str]) -> Value {
  let mut items = vec![Value::String(dref.to_string())];
  items.extend(segments.iter().map(|s| Value::String(s.to_string())));
  Value::Array(items)
}

fn marked(marker: &str, segments: &[&str]) -> Value {
  let mut items = vec![Value::String(marker.to_string())];
  items.extend(segments.iter().map(|s| Value::String(s.to_string())));
  Value::Array(items)
}

/// Typed construction of a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
  map: Map<String, Value>,
}

impl ConfigBuilder {
  pub fn name(self, name: &str) -> Self {
    self.set("name", name)
  }

  pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.map.insert(key.to_string(), value.into());
    self
  }

  pub fn dep(self, key: &str, dref: &DRef) -> Self {
    self.set(key, dref.to_string())
  }

  pub fn realized(self, key: &str, rref: &RRef) -> Self {
    self.set(key, rref.to_string())
  }

  pub fn promise(self, key: &str, segments: &[&str]) -> Self {
    self.set(key, promise(segments))
  }

  pub fn claim(self, key: &str, segments: &[&str]) -> Self {
    self.set(key, claim(segments))
  }

  pub fn build(self) -> Result<Config, ConfigError> {
    Config::from_value(Value::Object(self.map))
  }
}
