//! Derivation and realization references.
//!
//! # Formats
//!
//! - `dref:<hash32>-<name>`: a derivation, where `hash32` is the truncated
//!   SHA-256 of the canonical config
//! - `rref:<out32>-<hash32>-<name>`: one realization of that derivation, where
//!   `out32` is the truncated output hash
//!
//! Names are restricted to `[A-Za-z0-9_-]+`; hashes are lowercase hex.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_TAG, DREF_PREFIX, REF_HASH_LEN, RREF_PREFIX};

/// A malformed reference, name or tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
  #[error("invalid derivation reference '{0}'")]
  InvalidDRef(String),

  #[error("invalid realization reference '{0}'")]
  InvalidRRef(String),

  #[error("invalid name '{0}': expected [A-Za-z0-9_-]+")]
  InvalidName(String),

  #[error("invalid tag '{0}': expected [A-Za-z0-9_-]+")]
  InvalidTag(String),
}

/// Whether `name` is usable as a derivation name or tag.
pub fn is_valid_name(name: &str) -> bool {
  !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_ref_hash(s: &str) -> bool {
  s.len() == REF_HASH_LEN && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Reference to a derivation: its config hash plus a readable name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DRef {
  hash: String,
  name: String,
}

impl DRef {
  pub fn new(hash: &str, name: &str) -> Result<Self, RefError> {
    if !is_valid_name(name) {
      return Err(RefError::InvalidName(name.to_string()));
    }
    if !is_ref_hash(hash) {
      return Err(RefError::InvalidDRef(format!("{}{}-{}", DREF_PREFIX, hash, name)));
    }
    Ok(Self {
      hash: hash.to_string(),
      name: name.to_string(),
    })
  }

  /// Build from parts already known to be valid (a config hash and a checked name).
  pub(crate) fn from_parts(hash: String, name: String) -> Self {
    Self { hash, name }
  }

  pub fn parse(s: &str) -> Result<Self, RefError> {
    let invalid = || RefError::InvalidDRef(s.to_string());
    let body = s.strip_prefix(DREF_PREFIX).ok_or_else(invalid)?;
    Self::from_dir_name(body).ok_or_else(invalid)
  }

  /// Parse the `<hash32>-<name>` directory name used inside the store.
  pub fn from_dir_name(dir_name: &str) -> Option<Self> {
    if dir_name.len() <= REF_HASH_LEN + 1 || !dir_name.is_char_boundary(REF_HASH_LEN) {
      return None;
    }
    let (hash, rest) = dir_name.split_at(REF_HASH_LEN);
    let name = rest.strip_prefix('-')?;
    Self::new(hash, name).ok()
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn dir_name(&self) -> String {
    format!("{}-{}", self.hash, self.name)
  }
}

impl fmt::Display for DRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}-{}", DREF_PREFIX, self.hash, self.name)
  }
}

impl FromStr for DRef {
  type Err = RefError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for DRef {
  type Error = RefError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<DRef> for String {
  fn from(value: DRef) -> Self {
    value.to_string()
  }
}

/// Reference to one realization of a derivation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RRef {
  output_hash: String,
  dref: DRef,
}

impl RRef {
  pub fn new(output_hash: &str, dref: DRef) -> Result<Self, RefError> {
    if !is_ref_hash(output_hash) {
      return Err(RefError::InvalidRRef(format!(
        "{}{}-{}-{}",
        RREF_PREFIX,
        output_hash,
        dref.hash(),
        dref.name()
      )));
    }
    Ok(Self {
      output_hash: output_hash.to_string(),
      dref,
    })
  }

  pub(crate) fn from_parts(output_hash: String, dref: DRef) -> Self {
    Self { output_hash, dref }
  }

  pub fn parse(s: &str) -> Result<Self, RefError> {
    let invalid = || RefError::InvalidRRef(s.to_string());
    let body = s.strip_prefix(RREF_PREFIX).ok_or_else(invalid)?;
    if body.len() <= REF_HASH_LEN + 1 || !body.is_char_boundary(REF_HASH_LEN) {
      return Err(invalid());
    }
    let (output_hash, rest) = body.split_at(REF_HASH_LEN);
    let dref_dir = rest.strip_prefix('-').ok_or_else(invalid)?;
    let dref = DRef::from_dir_name(dref_dir).ok_or_else(invalid)?;
    Self::new(output_hash, dref).map_err(|_| invalid())
  }

  pub fn output_hash(&self) -> &str {
    &self.output_hash
  }

  pub fn dref(&self) -> &DRef {
    &self.dref
  }

  pub fn name(&self) -> &str {
    self.dref.name()
  }

  /// Directory name of this realization inside its derivation directory.
  pub fn dir_name(&self) -> &str {
    &self.output_hash
  }
}

impl fmt::Display for RRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}{}-{}-{}",
      RREF_PREFIX,
      self.output_hash,
      self.dref.hash(),
      self.dref.name()
    )
  }
}

impl FromStr for RRef {
  type Err = RefError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for RRef {
  type Error = RefError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<RRef> for String {
  fn from(value: RRef) -> Self {
    value.to_string()
  }
}

/// Label of one member of a realization group. The default tag is `out`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
  pub fn new(tag: &str) -> Result<Self, RefError> {
    if !is_valid_name(tag) {
      return Err(RefError::InvalidTag(tag.to_string()));
    }
    Ok(Self(tag.to_string()))
  }

  pub fn out() -> Self {
    Self(DEFAULT_TAG.to_string())
  }

  pub fn is_default(&self) -> bool {
    self.0 == DEFAULT_TAG
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Default for Tag {
  fn default() -> Self {
    Self::out()
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for Tag {
  type Error = RefError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(&value)
  }
}

impl From<Tag> for String {
  fn from(value: Tag) -> Self {
    value.0
  }
}
