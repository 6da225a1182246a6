//! Sort keys for ranking realization groups.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::time::UNIX_EPOCH;

use crate::group::Group;
use crate::refs::RRef;
use crate::store::StorageSettings;
use crate::store::query::store_buildtime;

/// A key value. Numbers order before text; NaN orders as the largest number.
#[derive(Debug, Clone)]
pub enum KeyValue {
  Number(f64),
  Text(String),
}

impl Ord for KeyValue {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (KeyValue::Number(a), KeyValue::Number(b)) => a.total_cmp(b),
      (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
      (KeyValue::Number(_), KeyValue::Text(_)) => Ordering::Less,
      (KeyValue::Text(_), KeyValue::Number(_)) => Ordering::Greater,
    }
  }
}

impl PartialOrd for KeyValue {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for KeyValue {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for KeyValue {}

/// How to score a group. A key that yields `None` excludes the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
  /// Build start time of the `out` member. Groups without one are excluded.
  Latest,
  /// Number stored in a file of the `out` member. Unreadable or unparsable
  /// files score as negative infinity.
  Best { filename: String },
  /// Only groups whose `out` member is in the set.
  Exact(BTreeSet<RRef>),
  /// Only groups whose `out` member contains the file.
  FileExists { filename: String },
}

impl SortKey {
  pub fn evaluate(&self, settings: &StorageSettings, group: &Group) -> Option<KeyValue> {
    let out = group.out();
    match self {
      SortKey::Latest => {
        let time = store_buildtime(settings, out)?;
        let secs = time.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
        Some(KeyValue::Number(secs))
      }
      SortKey::Best { filename } => {
        let score = fs::read_to_string(settings.rref_path(out).join(filename))
          .ok()
          .and_then(|text| text.trim().parse::<f64>().ok())
          .filter(|v| !v.is_nan())
          .unwrap_or(f64::NEG_INFINITY);
        Some(KeyValue::Number(score))
      }
      SortKey::Exact(rrefs) => rrefs.contains(out).then_some(KeyValue::Number(1.0)),
      SortKey::FileExists { filename } => settings
        .rref_path(out)
        .join(filename)
        .exists()
        .then_some(KeyValue::Number(1.0)),
    }
  }
}
