//! Read-only queries over the store.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use super::{StorageSettings, StoreError};
use crate::config::Config;
use crate::consts::{BUILDTIME_FILENAME, CONTEXT_FILENAME, GROUPS_FILENAME};
use crate::context::Context;
use crate::error::Result;
use crate::group::GroupMeta;
use crate::refs::{DRef, RRef, Tag};

fn read_to_string(path: &Path) -> Result<String, StoreError> {
  fs::read_to_string(path).map_err(|source| StoreError::Read {
    path: path.to_path_buf(),
    source,
  })
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>, StoreError> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(StoreError::Read {
        path: dir.to_path_buf(),
        source,
      });
    }
  };
  let mut names = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| StoreError::Read {
      path: dir.to_path_buf(),
      source,
    })?;
    if entry.path().is_dir()
      && let Some(name) = entry.file_name().to_str()
    {
      names.push(name.to_string());
    }
  }
  names.sort();
  Ok(names)
}

/// All derivations in the store, sorted.
pub fn store_drefs(settings: &StorageSettings) -> Result<Vec<DRef>, StoreError> {
  let names = read_dir_names(settings.store())?;
  Ok(names.iter().filter_map(|n| DRef::from_dir_name(n)).collect())
}

/// Realizations of one derivation, sorted.
pub fn store_rrefs_of(settings: &StorageSettings, dref: &DRef) -> Result<Vec<RRef>, StoreError> {
  let names = read_dir_names(&settings.dref_path(dref))?;
  Ok(names.iter().filter_map(|n| RRef::new(n, dref.clone()).ok()).collect())
}

/// Every realization in the store.
pub fn store_rrefs(settings: &StorageSettings) -> Result<Vec<RRef>, StoreError> {
  let mut rrefs = Vec::new();
  for dref in store_drefs(settings)? {
    rrefs.extend(store_rrefs_of(settings, &dref)?);
  }
  Ok(rrefs)
}

/// Realizations of `dref` that were built against exactly `context`.
pub fn store_rrefs_in(settings: &StorageSettings, dref: &DRef, context: &Context) -> Result<Vec<RRef>, StoreError> {
  let mut matching = Vec::new();
  for rref in store_rrefs_of(settings, dref)? {
    if store_context(settings, &rref)? == *context {
      matching.push(rref);
    }
  }
  Ok(matching)
}

pub fn dref_exists(settings: &StorageSettings, dref: &DRef) -> bool {
  settings.config_path(dref).is_file()
}

pub fn rref_exists(settings: &StorageSettings, rref: &RRef) -> bool {
  settings.rref_path(rref).is_dir()
}

pub fn store_config(settings: &StorageSettings, dref: &DRef) -> Result<Config, StoreError> {
  let path = settings.config_path(dref);
  let text = read_to_string(&path)?;
  Config::parse(&text).map_err(|source| StoreError::Config { path, source })
}

pub fn store_context(settings: &StorageSettings, rref: &RRef) -> Result<Context, StoreError> {
  let path = settings.rref_path(rref).join(CONTEXT_FILENAME);
  let text = read_to_string(&path)?;
  serde_json::from_str(&text).map_err(|source| StoreError::Parse { path, source })
}

/// Build start time, if the realizer recorded one.
pub fn store_buildtime(settings: &StorageSettings, rref: &RRef) -> Option<SystemTime> {
  let text = fs::read_to_string(settings.rref_path(rref).join(BUILDTIME_FILENAME)).ok()?;
  humantime::parse_rfc3339_weak(text.trim()).ok()
}

fn store_group_meta(settings: &StorageSettings, rref: &RRef) -> Result<Option<GroupMeta>, StoreError> {
  let path = settings.rref_path(rref).join(GROUPS_FILENAME);
  match fs::read_to_string(&path) {
    Ok(text) => serde_json::from_str(&text)
      .map(Some)
      .map_err(|source| StoreError::Parse { path, source }),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(source) => Err(StoreError::Read { path, source }),
  }
}

/// Tag of a realization within its group. Entries without group metadata are `out`.
pub fn store_tag(settings: &StorageSettings, rref: &RRef) -> Result<Tag, StoreError> {
  Ok(store_group_meta(settings, rref)?.map(|m| m.tag).unwrap_or_default())
}

/// Group id of a realization. Entries without group metadata form their own group.
pub fn store_group_id(settings: &StorageSettings, rref: &RRef) -> Result<String, StoreError> {
  Ok(
    store_group_meta(settings, rref)?
      .map(|m| m.group)
      .unwrap_or_else(|| rref.output_hash().to_string()),
  )
}

/// Immediate dependencies of `dref`: DRefs named in its config plus the
/// DRefs of embedded RRefs.
pub fn store_deps(settings: &StorageSettings, dref: &DRef) -> Result<BTreeSet<DRef>> {
  let refs = store_config(settings, dref)?.references()?;
  let mut deps = refs.drefs;
  deps.extend(refs.rrefs.into_iter().map(|r| r.dref().clone()));
  Ok(deps)
}

/// Transitive dependencies of `roots`, not including the roots themselves.
pub fn store_deepdeps(settings: &StorageSettings, roots: &BTreeSet<DRef>) -> Result<BTreeSet<DRef>> {
  let mut seen: BTreeSet<DRef> = BTreeSet::new();
  let mut queue: VecDeque<DRef> = roots.iter().cloned().collect();
  while let Some(dref) = queue.pop_front() {
    for dep in store_deps(settings, &dref)? {
      if seen.insert(dep.clone()) {
        queue.push_back(dep);
      }
    }
  }
  Ok(seen.into_iter().filter(|d| !roots.contains(d)).collect())
}

/// Realizations `rref` was built against: its context plus RRefs embedded in its config.
pub fn store_rref_deps(settings: &StorageSettings, rref: &RRef) -> Result<BTreeSet<RRef>> {
  let mut deps: BTreeSet<RRef> = store_context(settings, rref)?.rrefs().cloned().collect();
  deps.extend(store_config(settings, rref.dref())?.references()?.rrefs);
  Ok(deps)
}

/// Transitive closure of [`store_rref_deps`], not including the roots.
pub fn store_deep_rref_deps(settings: &StorageSettings, roots: &BTreeSet<RRef>) -> Result<BTreeSet<RRef>> {
  let mut seen: BTreeSet<RRef> = BTreeSet::new();
  let mut queue: VecDeque<RRef> = roots.iter().cloned().collect();
  while let Some(rref) = queue.pop_front() {
    for dep in store_rref_deps(settings, &rref)? {
      if seen.insert(dep.clone()) {
        queue.push_back(dep);
      }
    }
  }
  Ok(seen.into_iter().filter(|r| !roots.contains(r)).collect())
}
