use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use lightstore_lib::gc::{gc_plan, sweep};
use lightstore_lib::store_lock::{LockMode, StoreLock};
use lightstore_lib::{DRef, RRef, StorageSettings};

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(
  settings: &StorageSettings,
  keep: &[String],
  keep_rref: &[String],
  dry_run: bool,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();

  let keep_drefs = keep
    .iter()
    .map(|s| DRef::parse(s).with_context(|| format!("Invalid derivation reference: {}", s)))
    .collect::<Result<BTreeSet<_>>>()?;
  let keep_rrefs = keep_rref
    .iter()
    .map(|s| RRef::parse(s).with_context(|| format!("Invalid realization reference: {}", s)))
    .collect::<Result<BTreeSet<_>>>()?;

  let lock = StoreLock::acquire(settings, LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;

  let plan = gc_plan(settings, &keep_drefs, &keep_rrefs)?;
  debug!(
    keep_drefs = keep_drefs.len(),
    keep_rrefs = keep_rrefs.len(),
    drefs = plan.drefs.len(),
    rrefs = plan.rrefs.len(),
    "gc plan ready"
  );
  let result = sweep(settings, &plan, &lock, dry_run)?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Derivations removed", &result.stats.drefs_deleted.to_string());
    print_stat("Realizations removed", &result.stats.rrefs_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
