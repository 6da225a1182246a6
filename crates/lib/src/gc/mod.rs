//! Garbage collection.
//!
//! Classification ([`gc_drefs`], [`gc_rrefs`], [`gc_plan`]) only reads the
//! store. Deletion is the separate [`sweep`] step, which requires the caller
//! to hold the store lock exclusively.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::platform::immutable::make_mutable;
use crate::refs::{DRef, RRef};
use crate::store::StorageSettings;
use crate::store::query::{
  dref_exists, rref_exists, store_deep_rref_deps, store_deepdeps, store_drefs, store_rref_deps, store_rrefs,
};
use crate::store_lock::{LockMode, StoreLock};

/// Roots and their dependency closure, restricted to what is in the store.
fn live_drefs(settings: &StorageSettings, keep: &BTreeSet<DRef>) -> Result<BTreeSet<DRef>> {
  let roots: BTreeSet<DRef> = keep.iter().filter(|d| dref_exists(settings, d)).cloned().collect();
  let mut live = store_deepdeps(settings, &roots)?;
  live.extend(roots);
  Ok(live)
}

/// DRefs in the store that are not reachable from `keep`.
pub fn gc_drefs(settings: &StorageSettings, keep: &BTreeSet<DRef>) -> Result<BTreeSet<DRef>> {
  let live = live_drefs(settings, keep)?;
  let removable: BTreeSet<DRef> = store_drefs(settings)?.into_iter().filter(|d| !live.contains(d)).collect();
  debug!(live = live.len(), removable = removable.len(), "classified derivations");
  Ok(removable)
}

/// RRefs in the store that are neither in the closure of `keep_rrefs` nor a
/// realization of a kept derivation whose own dependencies are all kept.
pub fn gc_rrefs(
  settings: &StorageSettings,
  keep_drefs: &BTreeSet<DRef>,
  keep_rrefs: &BTreeSet<RRef>,
) -> Result<BTreeSet<RRef>> {
  let live = live_drefs(settings, keep_drefs)?;
  let roots: BTreeSet<RRef> = keep_rrefs.iter().filter(|r| rref_exists(settings, r)).cloned().collect();
  let mut pinned = store_deep_rref_deps(settings, &roots)?;
  pinned.extend(roots);

  let mut memo: BTreeMap<RRef, bool> = BTreeMap::new();
  let mut removable = BTreeSet::new();
  for rref in store_rrefs(settings)? {
    if !is_kept(settings, &rref, &live, &pinned, &mut memo)? {
      removable.insert(rref);
    }
  }
  debug!(pinned = pinned.len(), removable = removable.len(), "classified realizations");
  Ok(removable)
}

fn is_kept(
  settings: &StorageSettings,
  rref: &RRef,
  live: &BTreeSet<DRef>,
  pinned: &BTreeSet<RRef>,
  memo: &mut BTreeMap<RRef, bool>,
) -> Result<bool> {
  if pinned.contains(rref) {
    return Ok(true);
  }
  if let Some(kept) = memo.get(rref) {
    return Ok(*kept);
  }
  let mut kept = live.contains(rref.dref()) && rref_exists(settings, rref);
  if kept {
    for dep in store_rref_deps(settings, rref)? {
      if !is_kept(settings, &dep, live, pinned, memo)? {
        kept = false;
        break;
      }
    }
  }
  memo.insert(rref.clone(), kept);
  Ok(kept)
}

/// What a sweep would remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct GcPlan {
  pub drefs: BTreeSet<DRef>,
  pub rrefs: BTreeSet<RRef>,
}

impl GcPlan {
  pub fn is_empty(&self) -> bool {
    self.drefs.is_empty() && self.rrefs.is_empty()
  }
}

pub fn gc_plan(
  settings: &StorageSettings,
  keep_drefs: &BTreeSet<DRef>,
  keep_rrefs: &BTreeSet<RRef>,
) -> Result<GcPlan> {
  // Realizations pinned by RRef keep their derivations too.
  let mut keep = keep_drefs.clone();
  keep.extend(keep_rrefs.iter().map(|r| r.dref().clone()));
  let roots: BTreeSet<RRef> = keep_rrefs.iter().filter(|r| rref_exists(settings, r)).cloned().collect();
  keep.extend(store_deep_rref_deps(settings, &roots)?.iter().map(|r| r.dref().clone()));

  Ok(GcPlan {
    drefs: gc_drefs(settings, &keep)?,
    rrefs: gc_rrefs(settings, keep_drefs, keep_rrefs)?,
  })
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GcStats {
  pub drefs_scanned: usize,
  pub drefs_deleted: usize,
  pub rrefs_scanned: usize,
  pub rrefs_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.drefs_deleted + self.rrefs_deleted
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

/// Delete everything in `plan`. With `dry_run`, only report what would go.
///
/// Failures to delete single entries are logged and skipped.
pub fn sweep(settings: &StorageSettings, plan: &GcPlan, lock: &StoreLock, dry_run: bool) -> Result<GcResult> {
  if lock.mode() != LockMode::Exclusive {
    return Err(Error::SharedLock);
  }

  let mut stats = GcStats {
    drefs_scanned: store_drefs(settings)?.len(),
    rrefs_scanned: store_rrefs(settings)?.len(),
    ..GcStats::default()
  };
  let mut deleted_paths = Vec::new();

  // Realizations inside a removed derivation directory go with it.
  let rrefs = plan.rrefs.iter().filter(|r| !plan.drefs.contains(r.dref()));
  let targets = rrefs
    .map(|r| (settings.rref_path(r), false))
    .chain(plan.drefs.iter().map(|d| (settings.dref_path(d), true)));

  for (path, is_dref) in targets {
    if !path.exists() {
      continue;
    }
    let size = dir_size(&path);
    let nested = if is_dref {
      fs::read_dir(&path)
        .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
        .unwrap_or(0)
    } else {
      0
    };

    if !dry_run {
      let _ = make_mutable(&path);
      if let Err(e) = fs::remove_dir_all(&path) {
        warn!(path = %path.display(), error = %e, "failed to delete store entry");
        continue;
      }
    }
    debug!(path = %path.display(), dry_run, "removed store entry");

    if is_dref {
      stats.drefs_deleted += 1;
      stats.rrefs_deleted += nested;
    } else {
      stats.rrefs_deleted += 1;
    }
    stats.bytes_freed += size;
    deleted_paths.push(path);
  }

  info!(
    drefs_deleted = stats.drefs_deleted,
    rrefs_deleted = stats.rrefs_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult { stats, deleted_paths })
}
