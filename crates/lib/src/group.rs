//! Realization groups: tagged outputs produced together by one realizer call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::REF_HASH_LEN;
use crate::context::Context;
use crate::error::Result;
use crate::refs::{DRef, RRef, Tag};
use crate::store::StorageSettings;
use crate::store::query::{store_group_id, store_rrefs_in, store_tag};

/// Contents of `groups.json` inside a realization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
  pub tag: Tag,
  pub group: String,
}

/// Members of one group by tag. Always has an `out` member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Group {
  members: BTreeMap<Tag, RRef>,
}

impl Group {
  /// `None` if there is no `out` member.
  pub fn new(members: BTreeMap<Tag, RRef>) -> Option<Self> {
    members.contains_key(&Tag::out()).then_some(Self { members })
  }

  pub fn out(&self) -> &RRef {
    // Checked in `new`.
    &self.members[&Tag::out()]
  }

  pub fn get(&self, tag: &Tag) -> Option<&RRef> {
    self.members.get(tag)
  }

  pub fn members(&self) -> &BTreeMap<Tag, RRef> {
    &self.members
  }

  pub fn rrefs(&self) -> impl Iterator<Item = &RRef> {
    self.members.values()
  }
}

/// Identifier shared by all members of a group.
pub fn group_id(members: &BTreeMap<Tag, RRef>) -> String {
  let mut hasher = Sha256::new();
  for (tag, rref) in members {
    hasher.update(format!("{}:{}\n", tag, rref.output_hash()).as_bytes());
  }
  hex::encode(hasher.finalize())[..REF_HASH_LEN].to_string()
}

/// Partition `rrefs` into groups. Groups without an `out` member are dropped.
pub fn groups_of(settings: &StorageSettings, rrefs: &[RRef]) -> Result<Vec<Group>> {
  let mut partitions: BTreeMap<String, BTreeMap<Tag, RRef>> = BTreeMap::new();
  for rref in rrefs {
    let id = store_group_id(settings, rref)?;
    let tag = store_tag(settings, rref)?;
    partitions.entry(id).or_default().insert(tag, rref.clone());
  }
  let mut groups: Vec<Group> = partitions.into_values().filter_map(Group::new).collect();
  groups.sort_by(|a, b| a.out().cmp(b.out()));
  Ok(groups)
}

/// Groups of `dref` in the store that were built against exactly `context`.
pub fn store_groups(settings: &StorageSettings, dref: &DRef, context: &Context) -> Result<Vec<Group>> {
  let rrefs = store_rrefs_in(settings, dref, context)?;
  groups_of(settings, &rrefs)
}
