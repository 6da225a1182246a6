use std::collections::BTreeSet;

use lightstore_lib::store::query::{dref_exists, rref_exists, store_rrefs};
use lightstore_lib::{
  Config, DRef, Error, LockMode, RRef, RealizeOptions, StoreLock, gc_drefs, gc_plan, gc_rrefs, instantiate,
  match_only, realize_all, sweep,
};
use serde_json::json;

use super::common::{TestEnv, cfg, write_text};

struct Chain {
  n1: DRef,
  n2: DRef,
  n3: DRef,
  n4: DRef,
  r1: RRef,
  r2: RRef,
  r3: RRef,
  r4: RRef,
}

/// `n1 <- n2 <- n3` plus an unrelated `n4`, all realized.
fn chain(env: &TestEnv) -> Chain {
  let ([n1, n2, n3, n4], closure) = instantiate(&env.settings, |r| {
    let n1 = r.mk_derivation(cfg(json!({"name": "n1", "text": "1"})), match_only(), write_text())?;
    let n2 = r.mk_derivation(
      Config::builder().name("n2").set("text", "2").dep("src", &n1).build()?,
      match_only(),
      write_text(),
    )?;
    let n3 = r.mk_derivation(
      Config::builder().name("n3").set("text", "3").dep("src", &n2).build()?,
      match_only(),
      write_text(),
    )?;
    let n4 = r.mk_derivation(cfg(json!({"name": "n4", "text": "4"})), match_only(), write_text())?;
    Ok([n1, n2, n3, n4])
  })
  .unwrap();

  let ctx = realize_all(&closure, &RealizeOptions::new()).unwrap();
  let one = |d: &DRef| ctx.deref(d).unwrap()[0].clone();
  Chain {
    r1: one(&n1),
    r2: one(&n2),
    r3: one(&n3),
    r4: one(&n4),
    n1,
    n2,
    n3,
    n4,
  }
}

#[test]
fn keeping_the_chain_head_keeps_its_dependencies() {
  let env = TestEnv::new();
  let c = chain(&env);

  let removable = gc_drefs(&env.settings, &BTreeSet::from([c.n3.clone()])).unwrap();
  assert_eq!(removable, BTreeSet::from([c.n4.clone()]));

  let removable = gc_drefs(&env.settings, &BTreeSet::from([c.n2.clone()])).unwrap();
  assert_eq!(removable, BTreeSet::from([c.n3.clone(), c.n4.clone()]));

  let removable = gc_drefs(&env.settings, &BTreeSet::new()).unwrap();
  assert_eq!(removable, BTreeSet::from([c.n1, c.n2, c.n3, c.n4]));
}

#[test]
fn realizations_follow_their_derivations() {
  let env = TestEnv::new();
  let c = chain(&env);

  let removable = gc_rrefs(&env.settings, &BTreeSet::from([c.n3.clone()]), &BTreeSet::new()).unwrap();
  assert_eq!(removable, BTreeSet::from([c.r4.clone()]));

  // Pinning a realization keeps everything it was built against.
  let removable = gc_rrefs(&env.settings, &BTreeSet::new(), &BTreeSet::from([c.r3.clone()])).unwrap();
  assert_eq!(removable, BTreeSet::from([c.r4.clone()]));

  let removable = gc_rrefs(&env.settings, &BTreeSet::new(), &BTreeSet::from([c.r2.clone()])).unwrap();
  assert_eq!(removable, BTreeSet::from([c.r3, c.r4]));
  assert!(!removable.contains(&c.r1));
}

#[test]
fn plan_keeps_derivations_of_pinned_realizations() {
  let env = TestEnv::new();
  let c = chain(&env);

  let plan = gc_plan(&env.settings, &BTreeSet::new(), &BTreeSet::from([c.r3.clone()])).unwrap();
  assert_eq!(plan.drefs, BTreeSet::from([c.n4.clone()]));
  assert_eq!(plan.rrefs, BTreeSet::from([c.r4.clone()]));
  assert!(!plan.is_empty());
}

#[test]
fn sweep_requires_an_exclusive_lock() {
  let env = TestEnv::new();
  let c = chain(&env);
  let plan = gc_plan(&env.settings, &BTreeSet::from([c.n3.clone()]), &BTreeSet::new()).unwrap();

  let shared = StoreLock::acquire(&env.settings, LockMode::Shared, "test").unwrap();
  assert!(matches!(
    sweep(&env.settings, &plan, &shared, false),
    Err(Error::SharedLock)
  ));
}

#[test]
fn dry_run_reports_without_deleting() {
  let env = TestEnv::new();
  let c = chain(&env);
  let plan = gc_plan(&env.settings, &BTreeSet::from([c.n3.clone()]), &BTreeSet::new()).unwrap();

  let lock = StoreLock::acquire(&env.settings, LockMode::Exclusive, "gc").unwrap();
  let result = sweep(&env.settings, &plan, &lock, true).unwrap();
  assert_eq!(result.stats.drefs_deleted, 1);
  assert_eq!(result.stats.rrefs_deleted, 1);
  assert!(result.stats.bytes_freed > 0);
  assert!(dref_exists(&env.settings, &c.n4));
  assert!(rref_exists(&env.settings, &c.r4));
}

#[test]
fn sweep_deletes_unreachable_entries() {
  let env = TestEnv::new();
  let c = chain(&env);
  let plan = gc_plan(&env.settings, &BTreeSet::from([c.n3.clone()]), &BTreeSet::new()).unwrap();

  let lock = StoreLock::acquire(&env.settings, LockMode::Exclusive, "gc").unwrap();
  let result = sweep(&env.settings, &plan, &lock, false).unwrap();
  assert_eq!(result.stats.drefs_scanned, 4);
  assert_eq!(result.stats.rrefs_scanned, 4);
  assert_eq!(result.stats.total_deleted(), 2);
  assert_eq!(result.deleted_paths, vec![env.settings.dref_path(&c.n4)]);

  assert!(!dref_exists(&env.settings, &c.n4));
  for rref in [&c.r1, &c.r2, &c.r3] {
    assert!(rref_exists(&env.settings, rref));
  }
  assert_eq!(store_rrefs(&env.settings).unwrap().len(), 3);

  // Nothing left to collect.
  let again = gc_plan(&env.settings, &BTreeSet::from([c.n3]), &BTreeSet::new()).unwrap();
  assert!(again.is_empty());
}
